//! Tabular and JSON result printing.

use anyhow::Result;
use serde::Serialize;

use volta_engine::Engine;

/// One sampled row: simulation time plus every named signal.
#[derive(Debug, Serialize)]
pub struct SampleRow {
    pub t: f64,
    pub signals: Vec<(String, f64)>,
}

/// Collect the current named signals: labeled-node voltages first,
/// then computed values not shadowed by a label.
pub fn sample_row(engine: &Engine) -> SampleRow {
    let mut signals = engine.labeled_voltages();
    for (name, value) in engine.converged_values() {
        if !signals.iter().any(|(n, _)| *n == name) {
            signals.push((name, value));
        }
    }
    SampleRow {
        t: engine.time(),
        signals,
    }
}

pub fn print_table(engine: &Engine, samples: &[SampleRow], with_history: bool) {
    let Some(last) = samples.last() else {
        return;
    };

    if with_history && samples.len() > 1 {
        print!("{:>14}", "t");
        for (name, _) in &last.signals {
            print!("{:>14}", name);
        }
        println!();
        println!("{}", "-".repeat(14 * (1 + last.signals.len())));
        for row in samples {
            print!("{:>14.6e}", row.t);
            for (_, v) in &row.signals {
                print!("{:>14.6}", v);
            }
            println!();
        }
        println!();
    }

    println!("Final state at t = {:.6e} s:", last.t);
    for (name, value) in &last.signals {
        println!("  {name:>12} = {value:.6}");
    }

    let nonconverged = engine.nonconverged_steps();
    if nonconverged > 0 {
        println!();
        println!("warning: {nonconverged} step(s) hit the subiteration cap");
    }
}

pub fn print_json(engine: &Engine, samples: &[SampleRow]) -> Result<()> {
    #[derive(Serialize)]
    struct Report<'a> {
        t: f64,
        nonconverged_steps: u64,
        samples: &'a [SampleRow],
    }
    let report = Report {
        t: engine.time(),
        nonconverged_steps: engine.nonconverged_steps(),
        samples,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Element listing for `volta inspect`.
pub fn print_inspection(engine: &Engine) {
    println!("{} element(s):", engine.elements().len());
    for (i, element) in engine.elements().iter().enumerate() {
        println!("  #{i:<3} {}", element.info());
    }

    let labels = engine.labeled_voltages();
    if !labels.is_empty() {
        println!();
        println!("labeled nodes:");
        for (name, _) in &labels {
            println!("  {name}");
        }
    }

    if !engine.hints().is_empty() {
        println!();
        println!("hints:");
        for (name, hint) in engine.hints() {
            println!("  {name}: {hint}");
        }
    }
}
