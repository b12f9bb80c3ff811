//! Lagrangian PDF CLI - Run particle simulations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::time::Instant;

use lagrangian_pdf::{
    compute::{InertChemistry, LoopState, SimulationLoop, VelocityField},
    output::SnapshotWriter,
    schema::{ConfigError, InitialConditions, RunConfig},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!();
        eprintln!("Run a Lagrangian PDF particle simulation from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json      Path to run configuration file");
        eprintln!();
        eprintln!("Flags:");
        eprintln!("  --example        Print an example configuration");
        eprintln!("  --example-field  Print an example velocity field document");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example" => {
            print_example_config();
            return;
        }
        "--example-field" => {
            print_example_field();
            return;
        }
        _ => {}
    }

    let config_path = PathBuf::from(&args[1]);
    let config = RunConfig::from_path(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    // Relative field paths resolve against the config file's directory
    let field_path = match &config.flow_field_file {
        Some(path) if path.is_relative() => config_path
            .parent()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|| path.clone()),
        Some(path) => path.clone(),
        None => {
            eprintln!("Error: {}", ConfigError::MissingFlowFieldFile);
            std::process::exit(1);
        }
    };

    let field = VelocityField::from_path(&field_path).unwrap_or_else(|e| {
        eprintln!("Error loading velocity field: {}", e);
        std::process::exit(1);
    });

    let mut simulation = SimulationLoop::new(&config, field).unwrap_or_else(|e| {
        eprintln!("Error initializing simulation: {}", e);
        std::process::exit(1);
    });

    let mut writer = SnapshotWriter::new(
        &config.output_directory,
        config.export_interval,
        config.variance_scalar.clone(),
    )
    .unwrap_or_else(|e| {
        eprintln!("Error opening output directory: {}", e);
        std::process::exit(1);
    });

    let grid_shape = simulation.field().grid().shape();
    println!("Lagrangian PDF Simulation");
    println!("=========================");
    println!("Particles: {}", simulation.ensemble().count());
    println!("Scalars: {}", simulation.ensemble().scalar_names().join(", "));
    println!("Closure: {}", simulation.closure().name());
    println!(
        "Field: {}x{}x{}{}",
        grid_shape[0],
        grid_shape[1],
        grid_shape[2],
        if simulation.field().is_time_dependent() {
            " (time-dependent)"
        } else {
            ""
        }
    );
    println!("dt: {}", config.time_step);
    println!("Steps: {}", simulation.total_steps());
    println!("Output: {}", config.output_directory.display());
    println!();

    println!("Initial means:");
    print_means(&simulation);
    println!();

    let mut chemistry = InertChemistry;
    let steps = simulation.total_steps();

    println!("Running simulation...");
    let start = Instant::now();

    loop {
        let state = simulation
            .step(&mut chemistry, &mut writer)
            .unwrap_or_else(|e| {
                eprintln!(
                    "Simulation failed at step {} (t={}): {}",
                    simulation.steps_taken(),
                    simulation.time(),
                    e
                );
                std::process::exit(1);
            });

        let done = simulation.steps_taken();
        // Print progress every 10%
        if done % (steps / 10).max(1) == 0 || state == LoopState::Completed {
            let elapsed = start.elapsed().as_secs_f64();
            let variance = simulation
                .ensemble()
                .scalar_variance(&config.variance_scalar)
                .unwrap_or(0.0);
            println!(
                "  Step {}/{}: t={:.4}, var({})={:.6e}, {:.1} steps/s",
                done,
                steps,
                simulation.time(),
                config.variance_scalar,
                variance,
                done as f64 / elapsed
            );
        }

        if state == LoopState::Completed {
            break;
        }
    }

    let elapsed = start.elapsed();

    println!();
    println!("Final means:");
    print_means(&simulation);
    println!();
    println!("Output: {}", writer.stats());
    println!(
        "Time: {:.2}s ({:.1} steps/s)",
        elapsed.as_secs_f64(),
        steps as f64 / elapsed.as_secs_f64()
    );
}

fn print_means(simulation: &SimulationLoop) {
    for (name, mean) in simulation.ensemble().mean_scalar_values() {
        println!("  {}: {:.6}", name, mean);
    }
}

fn print_example_config() {
    let config = RunConfig {
        time_step: 0.01,
        total_time: 1.0,
        num_particles: 1000,
        random_seed: Some(42),
        flow_field_file: Some(PathBuf::from("flow_field.json")),
        initial_conditions: InitialConditions::Uniform {
            domain_min: [0.25; 3],
            domain_max: [0.75; 3],
            composition: [("temperature".to_string(), 300.0)].into_iter().collect(),
        },
        export_interval: 0.1,
        ..RunConfig::default()
    };
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing example config: {}", e);
            std::process::exit(1);
        }
    }
}

/// Uniform unit velocity along x on a 10x10x10 grid over the unit cube.
fn print_example_field() {
    const N: usize = 10;
    let axis: Vec<f64> = (0..N).map(|i| i as f64 / (N - 1) as f64).collect();
    let component = |value: f64| vec![vec![vec![value; N]; N]; N];

    let doc = serde_json::json!({
        "x": axis,
        "y": axis,
        "z": axis,
        "u": component(1.0),
        "v": component(0.0),
        "w": component(0.0),
    });
    match serde_json::to_string_pretty(&doc) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing example field: {}", e);
            std::process::exit(1);
        }
    }
}
