//! Document synthesis tests.

use kube::ResourceExt;

use nimbus::api::{SecurityIntent, BINDING_GENERATION_ANNOTATION};
use nimbus::idpool;
use nimbus::pipeline::synthesizer::{
    build_cluster_nimbus_policy, build_namespaced_policies, build_nimbus_policy,
    rules_from_intents, synthesized_generation,
};
use nimbus::pipeline::{BindingInfo, SynthesisError};

use crate::fixtures::{binding, cluster_binding, intent, intent_with_param, labels};

fn info_for(intents: Vec<SecurityIntent>, binding_name: &str) -> BindingInfo {
    BindingInfo {
        intent_names: intents.iter().map(ResourceExt::name_any).collect(),
        intents,
        binding_names: vec![binding_name.to_owned()],
        binding_namespaces: vec!["default".to_owned()],
        namespaces: Vec::new(),
    }
}

#[test]
fn dns_manipulation_binding_becomes_one_rule_document() {
    let mut source = binding("default", "dns-binding", &["dns"], &[("app", "nginx")]);
    source.metadata.uid = Some("binding-uid".to_owned());
    source.metadata.generation = Some(1);
    let info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "dns-binding");

    let document = build_nimbus_policy(&info, &source).expect("document should build");

    assert_eq!(document.name_any(), "dns-binding");
    assert_eq!(document.namespace().as_deref(), Some("default"));
    assert_eq!(document.spec.selector.match_labels, labels(&[("app", "nginx")]));
    assert_eq!(document.spec.rules.len(), 1);
    assert_eq!(document.spec.rules[0].id, idpool::DNS_MANIPULATION);
    assert_eq!(document.spec.rules[0].rule.rule_action, "Block");

    let owners = document.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "SecurityIntentBinding");
    assert_eq!(owners[0].name, "dns-binding");
    assert_eq!(owners[0].uid, "binding-uid");
    assert_eq!(owners[0].controller, Some(true));
}

#[test]
fn rules_copy_intents_verbatim_and_in_order() {
    let intents = vec![
        intent_with_param("pfa", idpool::EXPLOIT_PFA, "Audit", "severity", "7"),
        intent("dns", idpool::DNS_MANIPULATION, "Block"),
    ];
    let rules = rules_from_intents(&intents);

    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id, idpool::EXPLOIT_PFA);
    assert_eq!(rules[0].rule.rule_action, "Audit");
    assert_eq!(rules[0].rule.mode, "strict");
    assert_eq!(rules[0].rule.param("severity"), Some("7"));
    assert_eq!(rules[0].description, "exploitPFA test intent");
    assert_eq!(rules[1].id, idpool::DNS_MANIPULATION);
    assert!(rules[1].rule.params.is_empty());
}

#[test]
fn synthesis_is_deterministic() {
    let mut source = binding("default", "web", &["dns"], &[("app", "web")]);
    source.metadata.uid = Some("uid".to_owned());
    let info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");

    let first = build_nimbus_policy(&info, &source).expect("document should build");
    let second = build_nimbus_policy(&info, &source).expect("document should build");
    assert_eq!(first, second);
}

#[test]
fn generation_is_stamped_on_the_document() {
    let mut source = binding("default", "web", &["dns"], &[("app", "web")]);
    source.metadata.generation = Some(3);
    let info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");

    let document = build_nimbus_policy(&info, &source).expect("document should build");
    assert_eq!(
        document.annotations().get(BINDING_GENERATION_ANNOTATION).map(String::as_str),
        Some("3")
    );
    assert_eq!(synthesized_generation(&document), Some(3));
}

#[test]
fn no_intents_is_an_error() {
    let source = binding("default", "web", &["missing"], &[("app", "web")]);
    let info = info_for(Vec::new(), "web");
    let result = build_nimbus_policy(&info, &source);
    assert!(matches!(result, Err(SynthesisError::NoIntents)));
}

#[test]
fn no_bindings_is_an_error() {
    let source = binding("default", "web", &["dns"], &[("app", "web")]);
    let mut info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");
    info.binding_names.clear();
    let result = build_nimbus_policy(&info, &source);
    assert!(matches!(result, Err(SynthesisError::NoBindings)));
}

#[test]
fn empty_selector_is_refused_for_namespaced_documents() {
    let source = binding("default", "web", &["dns"], &[]);
    let info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");
    let result = build_nimbus_policy(&info, &source);
    assert!(matches!(result, Err(SynthesisError::EmptySelector(name)) if name == "web"));
}

#[test]
fn broken_cel_fails_synthesis() {
    let mut source = binding("default", "web", &["dns"], &[("app", "web")]);
    source.spec.selector.cel = vec!["{'app':".to_owned()];
    let info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");
    let result = build_nimbus_policy(&info, &source);
    assert!(matches!(result, Err(SynthesisError::Selector(_))));
}

#[test]
fn cluster_document_allows_empty_workload_selector() {
    let mut source = cluster_binding("tls", &["tls"], &["*"], &["kube-system"], &[]);
    source.metadata.uid = Some("cluster-uid".to_owned());
    let info = info_for(vec![intent("tls", idpool::ASSESS_TLS, "Audit")], "tls");

    let document = build_cluster_nimbus_policy(&info, &source).expect("document should build");
    assert_eq!(document.name_any(), "tls");
    assert_eq!(document.namespace(), None);
    assert!(document.spec.workload_selector.match_labels.is_empty());
    assert_eq!(document.spec.ns_selector.exclude_names, vec!["kube-system".to_owned()]);
    assert_eq!(document.owner_references()[0].kind, "ClusterSecurityIntentBinding");
}

#[test]
fn namespaced_fan_out_follows_covered_namespaces() {
    let mut source = cluster_binding("web", &["dns"], &["*"], &[], &[("app", "web")]);
    source.metadata.uid = Some("cluster-uid".to_owned());
    let mut info = info_for(vec![intent("dns", idpool::DNS_MANIPULATION, "Block")], "web");
    info.namespaces = vec!["alpha".to_owned(), "beta".to_owned()];

    let documents = build_namespaced_policies(&info, &source).expect("documents should build");
    let namespaces: Vec<_> = documents.iter().filter_map(|d| d.namespace()).collect();
    assert_eq!(namespaces, vec!["alpha".to_owned(), "beta".to_owned()]);
    for document in &documents {
        assert_eq!(document.name_any(), "web");
        assert_eq!(document.spec.selector.match_labels, labels(&[("app", "web")]));
        assert_eq!(document.owner_references()[0].uid, "cluster-uid");
    }
}

#[test]
fn namespaced_fan_out_is_skipped_without_workload_labels() {
    let source = cluster_binding("tls", &["tls"], &["*"], &[], &[]);
    let mut info = info_for(vec![intent("tls", idpool::ASSESS_TLS, "Audit")], "tls");
    info.namespaces = vec!["alpha".to_owned()];

    let documents = build_namespaced_policies(&info, &source).expect("documents should build");
    assert!(documents.is_empty());
}
