//! Contract tests: each scenario must actually exercise the invariants it relies on.

use graphprobe::device::Device;
use graphprobe::harness::{launch_recorded, GraphPipeline, GraphProducer, PipelineShape, StoppedProducer};
use graphprobe::invariant_ppt::{
    contract_test, COUNTERS_FREED_ONCE, COUNTERS_ZEROED, EXEC_ORDER_COMPLETE, GRAPH_DESTROYED_ONCE,
    GRAPH_LEGALITY, GRAPH_REJECTS_INVALID, LAUNCH_SYNCHRONIZED, READBACK_COMPLETE,
    TRACER_OUTCOME_RECORDED, TRACER_TOPOLOGY_CAPTURED,
};
use graphprobe::tracer::CompletionTracer;
use graphprobe::{ExecGraph, FlagStore};

#[test]
fn flag_store_lifecycle_contract() {
    let device = Device::default();
    {
        let store = FlagStore::<2>::new(&device).unwrap();
        assert!(store.all_unset().unwrap());
    }
    contract_test(
        "flag store lifecycle",
        &[COUNTERS_ZEROED, READBACK_COMPLETE, COUNTERS_FREED_ONCE],
    );
}

#[test]
fn traced_pipeline_contract() {
    let device = Device::default();
    {
        let store = FlagStore::<3>::new(&device).unwrap();
        let mut tracer = CompletionTracer::new(&device);
        GraphPipeline::new(store.get(), PipelineShape::Chain(3)).start(tracer.get());
        launch_recorded(&tracer).unwrap();
        assert!(store.all_set_once().unwrap());
    }
    contract_test(
        "traced pipeline",
        &[
            TRACER_TOPOLOGY_CAPTURED,
            TRACER_OUTCOME_RECORDED,
            EXEC_ORDER_COMPLETE,
            LAUNCH_SYNCHRONIZED,
            GRAPH_DESTROYED_ONCE,
        ],
    );
}

#[test]
fn stopped_outcome_contract() {
    let device = Device::default();
    let mut tracer = CompletionTracer::new(&device);
    StoppedProducer.start(tracer.get());
    contract_test("stopped outcome", &[TRACER_OUTCOME_RECORDED]);
}

#[test]
fn graph_mutation_contract() {
    let device = Device::default();
    let mut graph = ExecGraph::create(&device);
    let a = graph.add_empty_node(&[]).unwrap();
    let b = graph.add_empty_node(&[]).unwrap();
    graph.add_dependency(a, b).unwrap();
    assert!(graph.add_dependency(b, a).is_err());
    contract_test("graph mutation", &[GRAPH_LEGALITY, GRAPH_REJECTS_INVALID]);
}
