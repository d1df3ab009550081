//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "photofind",
    version,
    about = "Natural-language search over your photo collection",
    long_about = "photofind indexes photos with a CLIP image embedding, OCR text and recognised \
                  faces, then answers free-text queries such as \"alice at the beach\" or \
                  \"receipt from the hardware store\" by similarity."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/photofind/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the data directory (store, known faces)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Configuration profile to apply (e.g. "fast")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index an image or every image under a directory
    Index {
        /// Image file or directory
        path: PathBuf,

        /// Index at most this many images
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Re-process images that are already indexed
        #[arg(long)]
        reindex: bool,

        /// Parallel workers (defaults to the configured value)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search indexed photos with a text query
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Only photos showing this person
        #[arg(long)]
        person: Option<String>,

        /// Print the OCR text of each hit
        #[arg(long)]
        show_ocr: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the gallery of known faces
    Faces {
        #[command(subcommand)]
        action: FacesAction,
    },

    /// Show store statistics
    Stats {
        /// Show statistics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline on one image without storing it
    Inspect {
        /// Image file
        image: PathBuf,

        /// Show the result in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FacesAction {
    /// List known people and their reference photo counts
    List,

    /// Add reference photos for a person
    Add {
        /// Person name (becomes the directory name)
        #[arg(long)]
        name: String,

        /// Reference photos to copy into the gallery
        #[arg(long, num_args = 1.., required = true)]
        photos: Vec<PathBuf>,
    },

    /// Remove a person and their reference photos
    Remove {
        /// Person name
        #[arg(long)]
        name: String,
    },

    /// Rescan the known-faces directory
    Rebuild {
        /// Ignore cached embeddings and recompute everything
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
