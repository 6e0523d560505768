use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "mortgage-engine")]
#[command(about = "Mortgage pricing, default-risk prediction and application orchestration")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        /// all, pricing, prediction, orchestrator or training
        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Quick interest-rate quote
    Quote {
        #[arg(long)]
        loan_amount: f64,

        #[arg(long)]
        credit_score: u32,

        #[arg(long)]
        dti_ratio: f64,
    },

    /// Price and score a loan application read from a JSON file
    Assess {
        /// Path to an application JSON document
        #[arg(long)]
        application: String,
    },

    /// Train the default-risk model and store its artifacts
    Train {
        /// Override the synthetic sample count
        #[arg(long)]
        samples: Option<usize>,

        /// Override the number of trees
        #[arg(long)]
        trees: Option<usize>,
    },
}
