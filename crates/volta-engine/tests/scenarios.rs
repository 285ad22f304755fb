//! End-to-end simulations through the public engine API.

use volta_engine::{Engine, EngineConfig};

fn engine_with(text: &str) -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine.load_from_text(text).expect("circuit loads");
    engine
}

fn run_steps(engine: &mut Engine, steps: usize) {
    for _ in 0..steps {
        engine.step_once().expect("step succeeds");
    }
}

// ───────────────────────── RC charging ─────────────────────────

const RC_CIRCUIT: &str = "\
$ 10 1e-05 0.05 0 5
v 0 64 0 0 0 0 5 0 0 0
r 0 0 64 0 0 1000
c 64 0 64 64 0 1e-6 0
w 64 64 0 64 0
g 0 64 0 80 0
207 64 0 64 16 0 vc
";

#[test]
fn test_rc_charging_backward_euler() {
    let mut engine = engine_with(RC_CIRCUIT);
    // 5 ms at 10 us per step = 5 time constants
    run_steps(&mut engine, 500);

    let v_cap = engine.node_voltage("vc").unwrap();
    let expected = 5.0 * (1.0 - (-5.0_f64).exp());
    assert!(
        (v_cap - expected).abs() < 0.025,
        "V(cap) after 5 tau = {v_cap} (expected {expected} +/- 0.5%)"
    );
}

#[test]
fn test_rc_charging_reaches_supply() {
    let mut engine = engine_with(RC_CIRCUIT);
    run_steps(&mut engine, 2000); // 20 tau
    let v_cap = engine.node_voltage("vc").unwrap();
    assert!((v_cap - 5.0).abs() < 1e-3, "V(cap) = {v_cap}");
}

// ───────────────────────── Diode rectifier ─────────────────────────

const RECTIFIER: &str = "\
$ 10 1e-05 0.05 0 5
v 0 64 0 0 0 1 10 0 60 0
d 0 0 64 0 0 1e-14 1
r 64 0 64 64 0 1000
w 64 64 0 64 0
g 0 64 0 80 0
207 64 0 64 16 0 out
";

#[test]
fn test_half_wave_rectifier_peak() {
    let mut engine = engine_with(RECTIFIER);

    let mut peak = 0.0_f64;
    let mut trough = 0.0_f64;
    // One full second of 60 Hz at 10 us steps
    for _ in 0..100_000 {
        engine.step_once().unwrap();
        let v = engine.node_voltage("out").unwrap();
        peak = peak.max(v);
        trough = trough.min(v);
    }

    // Peak sits one silicon drop below the 10 V crest
    assert!(
        (peak - 9.3).abs() < 0.1,
        "rectified peak = {peak} (expected 9.3 +/- 0.1)"
    );
    // Reverse half-cycle is blocked
    assert!(trough > -0.1, "diode leaked in reverse: {trough}");
    assert_eq!(
        engine.nonconverged_steps(),
        0,
        "rectifier must converge at every step"
    );
}

// ───────────────────────── Iteration cap ─────────────────────────

#[test]
fn test_oscillating_fixed_point_hits_cap_and_continues() {
    // a = 1 - a^3 has no stable fixed-point iteration: the update
    // oscillates and can never satisfy the convergence check.
    let text = "\
$ 10 0.01 0.05 0 5
209 0 0 0 0 0 tbl 5 1 a = 1\\s-\\sa*a*a 0
";
    let mut engine = Engine::new(EngineConfig {
        subiteration_cap: 100,
        ..EngineConfig::default()
    });
    engine.load_from_text(text).unwrap();

    engine.step_once().expect("cap hit is not fatal");
    assert_eq!(engine.nonconverged_steps(), 1);
    // The last solution is still published
    assert!(engine.computed_value("a").is_some());

    engine.set_running(true);
    let report = engine.run_frame(50);
    assert!(report.error.is_none(), "non-convergence must not error");
    assert!(!report.converged);
    assert!(report.steps > 0, "simulation keeps going");
}

// ───────────────────────── SFC SIM model ─────────────────────────

const SIM_MODEL: &str = "\
@init
timestep 0.05
@end

@parameters params
alpha1 = 0.6
alpha2 = 0.4
theta = 0.2
G = 20
@end

@equations model
Y = C + G
T = theta * Y
YD = Y - T
C = alpha1*YD + alpha2*H
H ~ YD - C
H(0) = 0
@end

@scope Y
@scope H
";

#[test]
fn test_sim_model_reaches_equilibrium() {
    let mut engine = engine_with(SIM_MODEL);
    // 500 model-seconds at dt = 0.05
    run_steps(&mut engine, 10_000);

    // Steady state: Y* = G / (1 - alpha1*(1 - theta))
    let y_star = 20.0 / (1.0 - 0.6 * 0.8);
    // and H* = (1 - alpha1)*(1 - theta)*Y* / alpha2
    let h_star = 0.4 * 0.8 * y_star / 0.4;

    let y = engine.computed_value("Y").unwrap();
    let h = engine.computed_value("H").unwrap();
    assert!(
        (y - y_star).abs() < 0.1,
        "Y = {y} (expected {y_star} +/- 0.1)"
    );
    assert!(
        (h - h_star).abs() < 0.5,
        "H = {h} (expected {h_star} +/- 0.5)"
    );
}

#[test]
fn test_sim_model_accounting_consistency() {
    let mut engine = engine_with(SIM_MODEL);
    run_steps(&mut engine, 200);

    // Y = C + G and YD = Y - T hold at every published step to within
    // the iteration tolerance, even mid-transient.
    let y = engine.computed_value("Y").unwrap();
    let c = engine.computed_value("C").unwrap();
    let t = engine.computed_value("T").unwrap();
    let yd = engine.computed_value("YD").unwrap();
    assert!((y - (c + 20.0)).abs() < 0.1, "Y = C + G violated: {}", y - (c + 20.0));
    assert!((yd - (y - t)).abs() < 0.1, "YD = Y - T violated: {}", yd - (y - t));
}

// ───────────────────────── Master priority ─────────────────────────

#[test]
fn test_higher_priority_table_owns_shared_name() {
    // B registers first but loses to A's higher priority.
    let text = "\
$ 10 0.05 0.05 0 5
209 0 100 0 100 0 B 5 1 Cash = -7 0
209 0 0 0 0 0 A 10 1 Cash = 100 0
";
    let mut engine = engine_with(text);
    run_steps(&mut engine, 3);

    assert_eq!(
        engine.computed_value("Cash"),
        Some(100.0),
        "higher-priority writer must own the converged buffer"
    );
}

// ───────────────────────── Round trip ─────────────────────────

#[test]
fn test_export_reload_matches_run() {
    let mut original = engine_with(SIM_MODEL);
    let mut reloaded = Engine::new(EngineConfig::default());
    reloaded
        .load_from_text(&original.export_text())
        .expect("exported text reloads");

    // 1 model-second each
    run_steps(&mut original, 20);
    run_steps(&mut reloaded, 20);

    for name in ["Y", "T", "YD", "C", "H"] {
        let a = original.computed_value(name).unwrap();
        let b = reloaded.computed_value(name).unwrap();
        assert!(
            (a - b).abs() < 1e-6,
            "{name}: original {a} vs reloaded {b}"
        );
    }
}

#[test]
fn test_circuit_text_round_trip_voltages() {
    let mut original = engine_with(RC_CIRCUIT);
    let mut reloaded = Engine::new(EngineConfig::default());
    reloaded.load_from_text(&original.export_text()).unwrap();

    run_steps(&mut original, 100);
    run_steps(&mut reloaded, 100);

    let a = original.node_voltage("vc").unwrap();
    let b = reloaded.node_voltage("vc").unwrap();
    assert!((a - b).abs() < 1e-9, "vc: {a} vs {b}");
}

// ───────────────────────── Determinism ─────────────────────────

#[test]
fn test_identical_runs_are_bit_identical() {
    let mut first = engine_with(RECTIFIER);
    let mut second = engine_with(RECTIFIER);

    for step in 0..500 {
        first.step_once().unwrap();
        second.step_once().unwrap();
        let a = first.node_voltage("out").unwrap();
        let b = second.node_voltage("out").unwrap();
        assert!(a == b, "step {step}: {a} != {b}");
    }
}

// ───────────────────────── Element-order independence ─────────────────────────

#[test]
fn test_value_tables_are_order_independent() {
    // Mutually-referencing dynamic rows; the double buffer makes the
    // result independent of which table runs first.
    let forward = "\
$ 10 0.05 0.05 0 5
209 0 0 0 0 0 T1 5 1 x = 0.5*y\\s+\\s0*t\\s+\\s1 0
209 0 100 0 100 0 T2 5 1 y = 0.5*x\\s+\\s0*t 0
";
    let backward = "\
$ 10 0.05 0.05 0 5
209 0 100 0 100 0 T2 5 1 y = 0.5*x\\s+\\s0*t 0
209 0 0 0 0 0 T1 5 1 x = 0.5*y\\s+\\s0*t\\s+\\s1 0
";

    let mut a = engine_with(forward);
    let mut b = engine_with(backward);
    run_steps(&mut a, 10);
    run_steps(&mut b, 10);

    // Fixed point: x = 4/3, y = 2/3
    let (xa, ya) = (a.computed_value("x").unwrap(), a.computed_value("y").unwrap());
    let (xb, yb) = (b.computed_value("x").unwrap(), b.computed_value("y").unwrap());
    assert!((xa - 4.0 / 3.0).abs() < 1e-6, "x = {xa}");
    assert!((xa - xb).abs() < 1e-9, "x order-dependent: {xa} vs {xb}");
    assert!((ya - yb).abs() < 1e-9, "y order-dependent: {ya} vs {yb}");
}

// ───────────────────────── KCL at a junction ─────────────────────────

#[test]
fn test_currents_balance_at_divider_junction() {
    let text = "\
$ 10 1e-05 0.05 0 5
v 0 64 0 0 0 0 10 0 0 0
r 0 0 64 0 0 1000
r 64 0 64 64 0 3000
w 64 64 0 64 0
g 0 64 0 80 0
";
    let mut engine = engine_with(text);
    run_steps(&mut engine, 5);

    // Junction between the two resistors: currents out of one leg
    // enter the other.
    let into_junction = engine.elements()[1].current_into_node(1)
        + engine.elements()[2].current_into_node(0);
    assert!(
        into_junction.abs() < 1e-9,
        "KCL residual = {into_junction}"
    );

    // And the divider sits at 7.5 V
    let v = engine.elements()[2].base().volts[0];
    assert!((v - 7.5).abs() < 1e-9, "junction = {v}");
}

// ───────────────────────── Op-amp follower ─────────────────────────

#[test]
fn test_opamp_follower_tracks_input() {
    let text = "\
$ 10 1e-05 0.05 0 5
R 64 0 64 -32 0 0 2 0 0 0
a 0 0 64 0 0 100000 -15 15
w 64 16 0 0 0
";
    let mut engine = engine_with(text);
    run_steps(&mut engine, 3);

    // Output follows the 2 V rail on the non-inverting input
    let v_out = engine.elements()[1].base().volts[2];
    assert!((v_out - 2.0).abs() < 1e-3, "follower output = {v_out}");
}

// ───────────────────────── Scheduler integration ─────────────────────────

#[test]
fn test_actions_fire_and_stop_the_run() {
    let text = "\
$ 10 0.05 0.05 0 5
209 0 0 0 0 0 tbl 5 1 out = k 0
% ActionSchedule
% AS 0 1 set k 1
% AS 0.5 1 set k 2
% AS 1 1 stop
";
    let mut engine = engine_with(text);
    engine.set_running(true);

    let mut frames = 0;
    while engine.is_running() && frames < 100 {
        engine.run_frame(50);
        frames += 1;
    }

    assert!(!engine.is_running(), "stop action must halt the loop");
    // Halted just past the stop time
    assert!(
        engine.time() >= 1.0 && engine.time() < 1.2,
        "t = {}",
        engine.time()
    );
    // The t = 0.5 slider write is in effect
    assert_eq!(engine.computed_value("out"), Some(2.0));
}

// ───────────────────────── Boundary behaviors ─────────────────────────

#[test]
fn test_empty_circuit_is_a_noop() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.step_once().unwrap();
    assert_eq!(engine.node_count(), 0);
    assert!((engine.time() - engine.dt()).abs() < 1e-18);
}

#[test]
fn test_ground_only_circuit_is_a_noop() {
    let mut engine = engine_with("$ 10 1e-05 0.05 0 5\ng 0 0 0 16 0\n");
    run_steps(&mut engine, 3);
    assert_eq!(engine.node_count(), 0);
}

#[test]
fn test_disconnected_subcircuits_share_implicit_ground() {
    // Two floating loops, neither grounded
    let text = "\
$ 10 1e-05 0.05 0 5
v 0 0 0 64 0 0 5 0 0 0
r 0 0 0 64 0 1000
v 200 0 200 64 0 0 3 0 0 0
r 200 0 200 64 0 1000
";
    let mut engine = engine_with(text);
    run_steps(&mut engine, 3);
    // Both loops solve: each source still drops its voltage across its
    // resistor.
    let i1 = engine.elements()[1].base().current.abs();
    let i2 = engine.elements()[3].base().current.abs();
    assert!((i1 - 5e-3).abs() < 1e-6, "loop 1 current = {i1}");
    assert!((i2 - 3e-3).abs() < 1e-6, "loop 2 current = {i2}");
}

// ───────────────────────── Classification soundness ─────────────────────────

#[test]
fn test_alias_and_constant_rows_track_sources() {
    let text = "\
$ 10 1e-05 0.05 0 5
R 0 0 0 -32 0 0 5 0 0 0
207 0 0 0 16 0 Y
209 100 0 100 0 0 tbl 5 2 al = Y 0 k = 42 0
";
    let mut engine = engine_with(text);
    run_steps(&mut engine, 4);

    assert_eq!(engine.computed_value("al"), Some(5.0));
    assert_eq!(engine.computed_value("k"), Some(42.0));
}

// ───────────────────────── Error surfacing ─────────────────────────

#[test]
fn test_topology_error_halts_and_reports() {
    // Two ideal sources in parallel
    let text = "\
$ 10 1e-05 0.05 0 5
v 0 0 64 0 0 0 5 0 0 0
v 0 0 64 0 0 0 3 0 0 0
g 0 0 0 16 0
";
    let mut engine = engine_with(text);
    assert!(engine.step_once().is_err());

    engine.set_running(true);
    let report = engine.run_frame(50);
    assert!(report.error.is_some(), "frame must surface the error");
    assert_eq!(report.steps, 0, "no stepping while errored");
}

#[test]
fn test_scope_records_samples() {
    let mut engine = engine_with(RC_CIRCUIT);
    let handle = engine.subscribe_scope(volta_parser::ScopeRequest {
        target: "vc".into(),
        kind: volta_parser::ScopeKind::Voltage,
    });
    run_steps(&mut engine, 50);

    let scope = engine.scope(handle).unwrap();
    assert_eq!(scope.len(), 50);
    // Monotone charging: last sample above the first
    let first = scope.samples().next().unwrap().max;
    let last = scope.samples().last().unwrap().max;
    assert!(last > first);
}
