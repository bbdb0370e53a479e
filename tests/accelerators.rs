//! Accelerator timing-model tests.
//!
//! A scripted core programs the RedMulE model, whose TCDM port goes through
//! a two-bank interleaver into single-cycle memories.

use hiersim::components::redmule::{REG_K, REG_M, REG_N, REG_STATUS};
use hiersim::components::{
    Interleaver, Memory, RedMule, RedMuleGeometry, RedMuleState, RedMuleTiming, ScriptedMaster,
};
use hiersim::{IoStatusKind, Request, SimulationEngine};

fn geometry() -> RedMuleGeometry {
    RedMuleGeometry {
        ce_height: 4,
        ce_width: 4,
        ce_pipe: 0,
        elem_size: 2,
        bandwidth: 8,
        queue_depth: 4,
    }
}

fn cluster(script: ScriptedMaster) -> SimulationEngine {
    let mut engine = SimulationEngine::new();
    engine.add_component("core", Box::new(script)).unwrap();
    engine
        .add_component("redmule", Box::new(RedMule::new(geometry()).unwrap()))
        .unwrap();
    engine
        .add_component("tcdm/interleaver", Box::new(Interleaver::new(2, 4).unwrap()))
        .unwrap();
    for bank in 0..2 {
        engine
            .add_component(&format!("tcdm/bank_{}", bank), Box::new(Memory::new(4096, 1)))
            .unwrap();
        engine
            .bind_paths(
                &format!("tcdm/interleaver:out_{}", bank),
                &format!("tcdm/bank_{}:input", bank),
            )
            .unwrap();
    }
    engine.bind_paths("core:out", "redmule:input").unwrap();
    engine.bind_paths("redmule:tcdm", "tcdm/interleaver:input").unwrap();
    engine
}

fn program(m: u32, n: u32, k: u32) -> ScriptedMaster {
    ScriptedMaster::new()
        .with_request(1, Request::write_u32(REG_M, m))
        .with_request(2, Request::write_u32(REG_N, n))
        .with_request(3, Request::write_u32(REG_K, k))
        .with_request(4, Request::read_u32(REG_STATUS))
}

#[test]
fn test_single_tile_job_round_trip() {
    let mut engine = cluster(program(4, 4, 4).with_quit_on_done(0));
    assert_eq!(engine.join().unwrap(), Some(0));

    let core = engine.component_by_path::<ScriptedMaster>("core").unwrap();
    let trigger = core.completions.last().unwrap();
    assert_eq!(trigger.status, IoStatusKind::Pending);
    assert_eq!(trigger.request.latency, 21);
    assert_eq!(trigger.time - trigger.issued_at, 21 * 1000);
    assert_eq!(
        RedMuleTiming::analytic_cycles(&geometry(), 4, 4, 4, 1),
        trigger.request.latency
    );

    let redmule = engine.component_by_path::<RedMule>("redmule").unwrap();
    assert_eq!(
        redmule.state_history(),
        &[
            RedMuleState::Idle,
            RedMuleState::Preload,
            RedMuleState::Routine,
            RedMuleState::Storing,
            RedMuleState::Finished,
            RedMuleState::Idle,
        ]
    );
    assert_eq!(redmule.jobs, 1);
    assert_eq!(redmule.routine_iterations, 1);
    assert_eq!(redmule.storing_entries, 1);
}

#[test]
fn test_multi_tile_job_matches_closed_form() {
    let mut engine = cluster(program(8, 8, 4));
    engine.run().unwrap();

    let core = engine.component_by_path::<ScriptedMaster>("core").unwrap();
    let latency = core.completions.last().unwrap().request.latency;
    assert_eq!(latency, RedMuleTiming::analytic_cycles(&geometry(), 8, 8, 4, 1));

    let redmule = engine.component_by_path::<RedMule>("redmule").unwrap();
    assert_eq!(redmule.routine_iterations, 4);
    assert_eq!(redmule.state_history().iter().filter(|s| **s == RedMuleState::Routine).count(), 1);
}

#[test]
fn test_trigger_while_busy_is_granted_when_idle() {
    let script = program(4, 4, 4)
        .with_request(6, Request::read_u32(REG_STATUS))
        .with_quit_on_done(0);
    let mut engine = cluster(script);
    assert_eq!(engine.join().unwrap(), Some(0));

    let core = engine.component_by_path::<ScriptedMaster>("core").unwrap();
    assert_eq!(core.denials, 1);
    assert_eq!(core.grants, 1);
    let jobs: Vec<u64> = core
        .completions
        .iter()
        .filter(|c| c.status == IoStatusKind::Pending)
        .map(|c| c.time)
        .collect();
    // the second job starts the cycle the first one answers
    assert_eq!(jobs, vec![25_000, 46_000]);
    assert_eq!(engine.component_by_path::<RedMule>("redmule").unwrap().jobs, 2);
}

#[test]
fn test_zero_dimension_halts_run() {
    let mut engine = cluster(program(0, 4, 4));
    let err = engine.run().unwrap_err();
    assert!(err.is_fatal_diagnostic());
    assert_eq!(err.component(), Some("redmule"));
    assert!(err.to_string().contains("INVALID configuration"));

    // a halted engine refuses to continue
    assert!(engine.run().is_err());
}
