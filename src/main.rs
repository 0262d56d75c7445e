//! Rockwave CLI - Run wave propagation simulations from a parameter file.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rockwave::{
    compute::{ChunkedSolver, ProgressSink},
    schema::{SimulationParameters, SimulationResults, VolumeInputs},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "--example" => print_example_params(),
        "--help" | "-h" => print_usage(&args[0]),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Rockwave - Elastodynamic Wave Propagation");
    eprintln!();
    eprintln!("Usage: {} <command> [options]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <params.json> [labels.raw density.raw]");
    eprintln!("                                  Run a simulation. Without volume files a");
    eprintln!("                                  homogeneous volume is synthesized.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --example                       Print an example parameter file");
    eprintln!("  --help, -h                      Show this help message");
    eprintln!();
    eprintln!("Raw volume files are dense W*H*D arrays in x-major order: labels as");
    eprintln!("bytes, density as little-endian f32 (kg/m^3).");
}

/// Prints a line every ~10% of the run.
struct ConsoleProgress {
    total: u32,
    started: Instant,
}

impl ProgressSink for ConsoleProgress {
    fn report(&mut self, _progress: f32, step: u32, _message: &str) {
        let every = (self.total / 10).max(1);
        if step % every == 0 {
            let elapsed = self.started.elapsed().as_secs_f32();
            println!(
                "  Step {}/{}: {:.1} steps/s",
                step,
                self.total,
                step as f32 / elapsed
            );
        }
    }
}

fn cmd_run(args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: rockwave run <params.json> [labels.raw density.raw]");
        std::process::exit(1);
    }

    let params_path = PathBuf::from(&args[0]);
    let params_str = fs::read_to_string(&params_path).unwrap_or_else(|e| {
        eprintln!("Error reading parameter file: {}", e);
        std::process::exit(1);
    });
    let params: SimulationParameters = serde_json::from_str(&params_str).unwrap_or_else(|e| {
        eprintln!("Error parsing parameters: {}", e);
        std::process::exit(1);
    });

    let voxels = params.voxel_count();
    let (labels, density) = match (args.get(1), args.get(2)) {
        (Some(labels_path), Some(density_path)) => {
            (load_labels(labels_path), load_density(density_path))
        }
        _ => {
            println!("No volume files given; using a homogeneous volume.");
            (vec![0u8; voxels], vec![2500.0f32; voxels])
        }
    };

    println!("Rockwave Simulation");
    println!("===================");
    println!(
        "Volume: {}x{}x{} voxels at {} m",
        params.width, params.height, params.depth, params.pixel_size
    );
    println!("Steps: {}", params.time_steps);
    println!();

    let time_steps = params.time_steps;
    let volume = VolumeInputs::new(&labels, &density);
    let mut solver = ChunkedSolver::new(params, volume).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });
    solver.set_progress_sink(Box::new(ConsoleProgress {
        total: time_steps,
        started: Instant::now(),
    }));

    println!("Running simulation (dt = {:.3e} s)...", solver.dt());
    let results = solver.run();
    println!();
    print_results(&results);
}

fn load_labels(path: &str) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        eprintln!("Error reading labels volume {}: {}", path, e);
        std::process::exit(1);
    })
}

fn load_density(path: &str) -> Vec<f32> {
    let bytes = fs::read(path).unwrap_or_else(|e| {
        eprintln!("Error reading density volume {}: {}", path, e);
        std::process::exit(1);
    });
    if bytes.len() % 4 != 0 {
        eprintln!("Density volume {} is not a whole number of f32 values", path);
        std::process::exit(1);
    }
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn print_results(results: &SimulationResults) {
    println!("Results");
    println!("=======");
    println!("Steps executed: {}", results.total_time_steps);
    println!(
        "P first break: step {} -> {:.0} m/s",
        results.p_wave_travel_time_steps, results.p_wave_velocity
    );
    println!(
        "S first break: step {} -> {:.0} m/s",
        results.s_wave_travel_time_steps, results.s_wave_velocity
    );
    if results.vp_vs_ratio > 0.0 {
        println!("Vp/Vs: {:.2}", results.vp_vs_ratio);
    }
    let peak = results
        .wave_field_vx
        .iter()
        .chain(&results.wave_field_vy)
        .chain(&results.wave_field_vz)
        .fold(0.0f32, |m, &v| m.max(v));
    println!("Peak |v|: {:.3e} m/s", peak);
    let damaged = results.damage_field.iter().filter(|&&d| d > 0.0).count();
    println!("Damaged voxels: {}", damaged);
    println!("Snapshots: {}", results.snapshots.len());
    println!(
        "Compute time: {:.2}s ({:.1} steps/s)",
        results.computation_time_seconds,
        results.total_time_steps as f64 / results.computation_time_seconds.max(1e-9)
    );
}

fn print_example_params() {
    let params = SimulationParameters::default();
    println!("Example parameters (params.json):");
    println!("{}", serde_json::to_string_pretty(&params).unwrap());
}
