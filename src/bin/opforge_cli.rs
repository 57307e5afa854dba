use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use opforge::report::{plot_lifetime_histogram, plot_memory_plan, plot_schedule};
use opforge::sched::DEFAULT_SERENITY_SAMPLES;
use opforge::{
    best_fit, compute_lifetime, hierarchical_schedule, random_sample, reverse_post_order,
    serenity_schedule, Graph, ModelGraph,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "opforge-cli", version)]
#[command(about = "Memory-aware operator scheduling for inference graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Algorithm {
    /// Deterministic reverse post-order (memory-oblivious baseline)
    Rpo,
    /// Seeded uniform random topological order
    Random,
    /// Hierarchical memory-constrained scheduling with refinement
    Hier,
    /// Serenity-style sampled-budget scheduling
    Serenity,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a summary of a model graph
    Info {
        /// Path to the model graph JSON
        model: PathBuf,
    },
    /// Compute an op schedule and report its activation peak
    Schedule {
        /// Path to the model graph JSON
        model: PathBuf,
        /// Scheduling algorithm
        #[arg(long, value_enum, default_value = "hier")]
        algo: Algorithm,
        /// Seed for the random baseline
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Sample count per group for the serenity scheduler
        #[arg(long, default_value_t = DEFAULT_SERENITY_SAMPLES)]
        samples: usize,
        /// Disable sequence joining before serenity scheduling
        #[arg(long)]
        no_join: bool,
        /// Disable the cheap reverse post-order shortcut in serenity
        #[arg(long)]
        no_simple: bool,
        /// Print the full op order
        #[arg(long)]
        verbose: bool,
        /// Directory to render DOT/SVG reports into
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },
    /// Schedule, then pack value lifetimes into concrete byte offsets
    Pack {
        /// Path to the model graph JSON
        model: PathBuf,
        /// Scheduling algorithm
        #[arg(long, value_enum, default_value = "hier")]
        algo: Algorithm,
        /// Seed for the random baseline
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Directory to render DOT/SVG reports into
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },
}

fn load_graph(path: &PathBuf) -> anyhow::Result<Graph> {
    let model = ModelGraph::from_json_file(path)
        .with_context(|| format!("loading model from {}", path.display()))?;
    Graph::from_model(&model).context("building computation graph")
}

fn run_algorithm(
    graph: &Graph,
    algo: Algorithm,
    seed: u64,
    samples: usize,
    join: bool,
    simple: bool,
) -> anyhow::Result<Vec<opforge::VertexId>> {
    let sched = match algo {
        Algorithm::Rpo => reverse_post_order(graph),
        Algorithm::Random => {
            let mut rng = StdRng::seed_from_u64(seed);
            random_sample(graph, &mut rng)
        }
        Algorithm::Hier => hierarchical_schedule(graph)?,
        Algorithm::Serenity => serenity_schedule(graph, join, simple, samples)?,
    };
    if sched.len() != graph.ops.len() {
        bail!(
            "scheduler returned {} ops, expected {}",
            sched.len(),
            graph.ops.len()
        );
    }
    Ok(sched)
}

fn main() -> anyhow::Result<()> {
    opforge::logging::init_logging_default();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { model } => {
            let graph = load_graph(&model)?;
            println!("graph:      {}", graph.name);
            println!("inputs:     {}", graph.inputs.len());
            println!("outputs:    {}", graph.outputs.len());
            println!("parameters: {}", graph.params.len());
            println!("operators:  {}", graph.ops.len());
            let param_bytes: u64 = graph
                .params
                .iter()
                .map(|&p| graph.value(p).size())
                .sum();
            println!("weight bytes: {param_bytes}");
        }

        Commands::Schedule {
            model,
            algo,
            seed,
            samples,
            no_join,
            no_simple,
            verbose,
            plot_dir,
        } => {
            let graph = load_graph(&model)?;
            let sched = run_algorithm(&graph, algo, seed, samples, !no_join, !no_simple)?;
            let stat = compute_lifetime(&sched, &graph)?;
            let peak = stat.peak(&graph);
            println!("ops scheduled:   {}", sched.len());
            println!("activation peak: {} bytes ({} KiB)", peak, peak / 1024);
            if verbose {
                for (i, &op) in sched.iter().enumerate() {
                    let node = graph.op(op);
                    println!("{:4}  {:<24} {}", i, node.op_type, node.name);
                }
            }
            if let Some(dir) = plot_dir {
                plot_schedule(&graph, &sched, &dir, "schedule");
                plot_lifetime_histogram(&stat, &graph, &dir, "histogram");
            }
        }

        Commands::Pack {
            model,
            algo,
            seed,
            plot_dir,
        } => {
            let graph = load_graph(&model)?;
            let sched = run_algorithm(
                &graph,
                algo,
                seed,
                DEFAULT_SERENITY_SAMPLES,
                true,
                true,
            )?;
            let stat = compute_lifetime(&sched, &graph)?;
            let plan = best_fit(&stat, &graph)?;
            println!("lifetime peak: {} bytes", stat.peak(&graph));
            println!("packed peak:   {} bytes", plan.peak);
            for desc in &plan.descs {
                println!(
                    "{:<24} [{:>4}, {:>4})  {:>10} bytes @ {}",
                    graph.value(desc.value).name,
                    desc.gen,
                    desc.kill,
                    desc.size,
                    desc.offset
                );
            }
            if let Some(dir) = plot_dir {
                plot_memory_plan(&plan, &dir, "plan");
            }
        }
    }

    Ok(())
}
