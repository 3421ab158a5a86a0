//! End-to-end tests: manifest or registry in, run report out.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::context::RunContext;
    use crate::core::{EdgeKind, InstanceStatus};
    use crate::domain::ParameterDomain;
    use crate::errors::{GraphError, SpectraflowError};
    use crate::events::{self, CollectingEventSink};
    use crate::graph::{Producer, SlotBinding, UnresolvedReason, Validator};
    use crate::pipeline::Pipeline;
    use crate::registry::{
        ArtifactCatalog, ArtifactType, Scope, ScopeKind, StageDefinition, StageManifest,
        StageRegistry,
    };
    use crate::scheduler::{SchedulerConfig, SkipCause};
    use crate::testing::{
        assert_all_succeeded, assert_runs_before, assert_skipped_by, assert_status,
        spectral_catalog, spectral_domain, spectral_probe, spectral_registry, spectral_stages,
        ScriptedExecutor, SPECTRAL_MANIFEST,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn two_names() -> ParameterDomain {
        ParameterDomain::new(["e1", "e2"]).with_tag("T1", ["e1", "e2"])
    }

    #[test]
    fn test_scenario_a_one_ingest_feeds_every_exposure() {
        let registry = StageManifest::from_yaml_str(SPECTRAL_MANIFEST)
            .unwrap()
            .to_registry()
            .unwrap();
        let ctx = RunContext::new("/data", ParameterDomain::new(["e1", "e2"]));
        let prepared = Pipeline::new(registry).prepare(&ctx).unwrap();
        let graph = prepared.graph();

        assert_eq!(graph.instances_of("ingest").len(), 1);
        assert_eq!(graph.instances_of("reinterpolate").len(), 2);
        assert!(graph.instances_of("stack").is_empty());

        let ingest = graph.find("ingest").unwrap();
        for key in ["reinterpolate[name=e1]", "reinterpolate[name=e2]"] {
            let instance = graph.find(key).unwrap();
            let incoming: Vec<_> = graph.incoming(instance.id).collect();
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[0].producer, ingest.id);
            assert_eq!(incoming[0].kind, EdgeKind::Required);
            assert_eq!(incoming[0].artifact.relative_path, "imported/spectra.p");
        }
    }

    #[test]
    fn test_scenario_b_tag_collection_binds_every_member() {
        let ctx = RunContext::new("/data", two_names());
        let prepared = Pipeline::new(spectral_registry().unwrap()).prepare(&ctx).unwrap();
        let graph = prepared.graph();

        let stack = graph.find("stack[tag=T1]").unwrap();
        let bound = stack.input("spectra").unwrap().binding.artifacts();
        let paths: Vec<&str> = bound.iter().map(|b| b.artifact.relative_path.as_str()).collect();
        assert_eq!(paths, ["resampled/e1.p", "resampled/e2.p"]);
        for b in bound {
            let Producer::Instance(producer) = b.producer else {
                panic!("expected an instance producer");
            };
            assert_eq!(graph.instance(producer).unwrap().stage, "reinterpolate");
        }
    }

    #[tokio::test]
    async fn test_scenario_c_optional_slot_without_producer_stays_resolvable() {
        let catalog = spectral_catalog()
            .unwrap()
            .with(ArtifactType::new("telluric-model", "telluric/{name}.fits").unwrap())
            .with(ArtifactType::new("corrected", "corrected/{name}.p").unwrap());
        let mut registry = StageRegistry::new(catalog);
        for stage in spectral_stages() {
            registry.register(stage).unwrap();
        }
        registry
            .register(
                StageDefinition::new("telluric")
                    .with_scope(Scope::per_name())
                    .input("spectrum", "resampled")
                    .optional_input("model", "telluric-model")
                    .output("corrected", "corrected"),
            )
            .unwrap();

        let ctx = RunContext::new("/data", two_names());
        let prepared = Pipeline::new(registry).prepare(&ctx).unwrap();
        let telluric = prepared.graph().find("telluric[name=e1]").unwrap();
        assert!(telluric.resolution.is_resolvable());
        assert_eq!(telluric.input("model").unwrap().binding, SlotBinding::Absent);
        assert!(prepared
            .graph()
            .incoming(telluric.id)
            .all(|e| e.slot != "model"));
        assert!(prepared.validation().is_clean());

        let executor = Arc::new(ScriptedExecutor::new());
        let report = prepared.execute(executor.clone(), &ctx).await;
        assert_status(&report, "telluric[name=e1]", InstanceStatus::Succeeded);
        assert!(executor.invocation("telluric[name=e2]").unwrap().is_missing("model"));
    }

    #[tokio::test]
    async fn test_scenario_d_duplicate_claim_aborts_before_execution() {
        let mut registry = spectral_registry().unwrap();
        registry
            .register(
                StageDefinition::new("reinterpolate-fast")
                    .with_contract("reinterpolate")
                    .with_scope(Scope::per_name())
                    .input("imported", "imported")
                    .output("resampled", "resampled"),
            )
            .unwrap();
        let ctx = RunContext::new("/data", spectral_domain());
        let executor = ScriptedExecutor::new();

        let err = Pipeline::new(registry).prepare(&ctx).unwrap_err();
        assert!(matches!(
            err,
            SpectraflowError::Graph(GraphError::DuplicateArtifactClaim { ref artifact, .. })
                if artifact == "resampled/e1.p"
        ));
        assert_eq!(err.error_info().unwrap().code, "GRAPH-003-DUPLICATE_CLAIM");
        assert!(executor.invocations().is_empty());
    }

    #[test]
    fn test_mutually_requiring_stages_are_rejected() {
        let catalog = ArtifactCatalog::new()
            .with(ArtifactType::new("ccf", "ccf/{name}.p").unwrap())
            .with(ArtifactType::new("rv", "rv/{name}.p").unwrap());
        let registry = StageRegistry::new(catalog)
            .stage(
                StageDefinition::new("measure")
                    .with_scope(Scope::per_name())
                    .input("ccf", "ccf")
                    .output("rv", "rv"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("correlate")
                    .with_scope(Scope::per_name())
                    .input("rv", "rv")
                    .output("ccf", "ccf"),
            )
            .unwrap();
        let ctx = RunContext::new("/data", ParameterDomain::new(["e1"]));

        let err = Pipeline::new(registry).prepare(&ctx).unwrap_err();
        let SpectraflowError::Graph(GraphError::CycleDetected(cycle)) = err else {
            panic!("expected a cycle, got {err}");
        };
        assert_eq!(cycle.links.len(), 2);
        assert_eq!(cycle.cycle_path().first(), cycle.cycle_path().last());
    }

    #[tokio::test]
    async fn test_unresolvable_instances_are_reported_and_skipped() {
        let catalog = spectral_catalog()
            .unwrap()
            .with(ArtifactType::new("blaze", "blaze/{name}.fits").unwrap())
            .with(ArtifactType::new("deblazed", "deblazed/{name}.p").unwrap())
            .with(ArtifactType::new("deblazed-stack", "deblazed/{tag}.p").unwrap());
        let registry = StageRegistry::new(catalog)
            .stage(
                StageDefinition::new("deblaze")
                    .with_scope(Scope::per_name())
                    .input("blaze", "blaze")
                    .output("deblazed", "deblazed"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("deblazed-stack")
                    .with_scope(Scope::per_tag())
                    .collection_input("spectra", "deblazed")
                    .output("stacked", "deblazed-stack"),
            )
            .unwrap();
        let ctx = RunContext::new("/data", two_names());
        let prepared = Pipeline::new(registry).prepare(&ctx).unwrap();

        assert_eq!(prepared.validation().diagnostics.len(), 3);
        assert!(prepared.plan().is_empty());
        let stack = prepared
            .validation()
            .diagnostics
            .iter()
            .find(|d| d.key == "deblazed-stack[tag=T1]")
            .unwrap();
        assert!(matches!(
            stack.reasons[0],
            UnresolvedReason::UnresolvableProducer { .. }
        ));

        let executor = Arc::new(ScriptedExecutor::new());
        let report = prepared.execute(executor.clone(), &ctx).await;
        assert!(executor.invocations().is_empty());
        assert_eq!(report.skipped().len(), 3);
        assert!(matches!(
            report.outcome("deblaze[name=e1]").unwrap().skip_cause,
            Some(SkipCause::Unresolvable { .. })
        ));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_through_required_edges_only() {
        let ctx = RunContext::new("/data", spectral_domain());
        let prepared = Pipeline::new(spectral_registry().unwrap()).prepare(&ctx).unwrap();
        let executor = Arc::new(ScriptedExecutor::new().fail("reinterpolate[name=e3]"));
        let report = prepared.execute(executor, &ctx).await;

        assert_skipped_by(&report, "stack[tag=T2]", "reinterpolate[name=e3]");
        assert_skipped_by(&report, "rassine-spectrum[name=e3]", "reinterpolate[name=e3]");
        assert_skipped_by(&report, "rassine-master[tag=T2]", "stack[tag=T2]");
        assert_status(&report, "stack[tag=T1]", InstanceStatus::Succeeded);
        assert_status(&report, "rassine-spectrum[name=e1]", InstanceStatus::Succeeded);

        let chain: Vec<&str> = report
            .causal_chain("rassine-master[tag=T2]")
            .iter()
            .map(|o| o.key.as_str())
            .collect();
        assert_eq!(
            chain,
            ["rassine-master[tag=T2]", "stack[tag=T2]", "reinterpolate[name=e3]"]
        );
    }

    #[tokio::test]
    async fn test_shared_contract_runs_at_two_scopes() {
        let ctx = RunContext::new("/data", spectral_domain());
        let pipeline = Pipeline::new(spectral_registry().unwrap());
        let prepared = pipeline.prepare(&ctx).unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let report = prepared.execute(executor.clone(), &ctx).await;

        assert_all_succeeded(&report);
        let master = executor.invocation("rassine-master[tag=T1]").unwrap();
        let spectrum = executor.invocation("rassine-spectrum[name=e1]").unwrap();
        assert_eq!(master.contract, "rassine");
        assert_eq!(spectrum.contract, "rassine");
        assert_eq!(spectrum.input("anchors")[0].relative_path, "rassine/anchors_T1.csv");
        assert_runs_before(&report, "rassine-master[tag=T1]", "rassine-spectrum[name=e1]");
    }

    #[tokio::test]
    async fn test_discovered_domain_drives_the_run() {
        let pipeline = Pipeline::new(spectral_registry().unwrap())
            .with_config(SchedulerConfig::new().with_max_parallel(2));
        let domain = pipeline.discover(&spectral_probe()).unwrap();
        assert_eq!(domain, spectral_domain());

        let sink = Arc::new(CollectingEventSink::new());
        let ctx = RunContext::new("/data", domain).with_event_sink(sink.clone());
        let prepared = pipeline.prepare(&ctx).unwrap();
        let description = prepared.describe();
        assert_eq!(description.instances, 11);
        assert_eq!(description.batches[0], ["ingest"]);

        let executor = Arc::new(ScriptedExecutor::new());
        let report = prepared.execute(executor.clone(), &ctx).await;
        assert_all_succeeded(&report);
        assert!(executor.peak_concurrency() <= 2);
        assert_eq!(report.fingerprint, description.fingerprint);
        assert_eq!(report.run_id, ctx.run_id());
        assert_eq!(sink.events_of_type(events::INSTANCE_STARTED).len(), 11);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let token = Arc::new(CancellationToken::new());
        let ctx = RunContext::new("/data", spectral_domain()).with_cancellation(token.clone());
        let prepared = Pipeline::new(spectral_registry().unwrap()).prepare(&ctx).unwrap();
        token.cancel("operator abort");

        let executor = Arc::new(ScriptedExecutor::new());
        let report = prepared.execute(executor.clone(), &ctx).await;
        assert!(executor.invocations().is_empty());
        assert_eq!(report.skipped().len(), 11);
        assert_eq!(report.cancelled.as_deref(), Some("operator abort"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let pipeline = Pipeline::new(spectral_registry().unwrap());
        let a = RunContext::new("/data/a", spectral_domain());
        let b = RunContext::new("/data/b", two_names());
        let run_a = pipeline.prepare(&a).unwrap();
        let run_b = pipeline.prepare(&b).unwrap();
        let executor_a = Arc::new(ScriptedExecutor::new());
        let executor_b = Arc::new(ScriptedExecutor::new());

        let (report_a, report_b) = tokio::join!(
            run_a.execute(executor_a.clone(), &a),
            run_b.execute(executor_b.clone(), &b)
        );
        assert_eq!(report_a.outcomes.len(), 11);
        assert_eq!(report_b.outcomes.len(), 7);
        assert_ne!(report_a.run_id, report_b.run_id);
        assert!(executor_b
            .invocations()
            .iter()
            .all(|i| i.root == std::path::Path::new("/data/b")));
    }

    fn tagged_domain(assignment: &[usize]) -> ParameterDomain {
        let names: Vec<String> = (0..assignment.len()).map(|i| format!("e{i}")).collect();
        let mut domain = ParameterDomain::new(names.clone());
        for tag in 0..3 {
            let members: Vec<String> = names
                .iter()
                .zip(assignment)
                .filter(|(_, t)| **t == tag)
                .map(|(n, _)| n.clone())
                .collect();
            if !members.is_empty() {
                domain = domain.with_tag(format!("T{tag}"), members);
            }
        }
        domain
    }

    proptest! {
        #[test]
        fn prop_expansion_counts_and_batch_order(assignment in proptest::collection::vec(0usize..3, 1..7)) {
            let domain = tagged_domain(&assignment);
            let tags = domain.values(ScopeKind::Tag).len();
            let ctx = RunContext::new("/data", domain);
            let prepared = Pipeline::new(spectral_registry().unwrap()).prepare(&ctx).unwrap();
            let graph = prepared.graph();

            prop_assert_eq!(graph.instances_of("ingest").len(), 1);
            prop_assert_eq!(graph.instances_of("reinterpolate").len(), assignment.len());
            prop_assert_eq!(graph.instances_of("rassine-spectrum").len(), assignment.len());
            prop_assert_eq!(graph.instances_of("stack").len(), tags);
            prop_assert!(prepared.validation().is_clean());

            for edge in graph.edges() {
                let producer = prepared.plan().batch_of(edge.producer);
                let consumer = prepared.plan().batch_of(edge.consumer);
                prop_assert!(producer < consumer);
            }
            prop_assert_eq!(Validator::validate(graph).unwrap(), prepared.validation().clone());
        }
    }
}
