use clap::{Parser, Subcommand};
use layerstack::config::Config;
use layerstack::data::{batch_signature, Inputs};
use layerstack::logging::init_logging;
use layerstack::models::positionwise_seq2seq;
use layerstack::nn::{Layer, Mode, Network};
use layerstack::shapes::{ShapeDtype, Signature};
use layerstack::training::train;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "layerstack: composable neural-network layers", long_about = None)]
struct Cli {
    /// Log every training step
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the seq2seq model on synthetic data
    Train {
        /// Hyperparameter file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override `train.steps`
        #[arg(long)]
        steps: Option<usize>,

        /// Override `train.output_dir`
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Show the resolved config and the model it builds
    Inspect {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Train {
            config,
            steps,
            output_dir,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(steps) = steps {
                config.train.steps = steps;
            }
            if let Some(dir) = output_dir {
                config.train.output_dir = dir;
            }
            config.validate()?;

            let inputs = Inputs::synthetic(&config.inputs, &config.model, config.train.seed);
            let summary = train(&config, inputs)?;
            println!("Trained {} steps", summary.steps);
            if let Some(loss) = summary.final_loss {
                println!("Final train loss: {:.4}", loss);
            }
            if let Some(eval) = summary.eval {
                println!(
                    "Eval loss: {:.4} | accuracy: {:.4}",
                    eval.loss, eval.accuracy
                );
            }
            if let Some(path) = summary.checkpoint {
                println!("Checkpoint: {}", path.display());
            }
        }
        Command::Inspect { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);

            let model = positionwise_seq2seq(&config.model, Mode::Eval)?;
            let input_signature: Vec<ShapeDtype> =
                batch_signature(config.inputs.batch_size, config.inputs.max_length)
                    .into_iter()
                    .take(model.n_in())
                    .collect();
            let mut network = Network::new(model);
            let weights = network.init(&input_signature, config.train.seed)?;
            let (tensors, parameters) = (weights.len(), weights.size());

            println!();
            let layer = network.layer();
            println!("Model: {} of {} layers", layer.name(), layer.sublayers().len());
            println!("Weights: {} tensors, {} parameters", tensors, parameters);
            println!("Input:  {}", Signature::from_items(input_signature));
            println!(
                "Output: {}",
                Signature::from_items(network.output_signature()?.to_vec())
            );
        }
    }
    Ok(())
}
