use anyhow::{bail, Context as _, Result};
use canvasdb::{
    Canvas, CanvasConfig, LayerOptions, ListOptions, NewDocument, StorageMode,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "canvasdb")]
#[command(about = "Context-addressed, bitmap-indexed document store", long_about = None)]
struct Args {
    /// Data directory [default: the config file's, else ./data]
    #[arg(long, env = "CANVASDB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON config file; command-line flags win over its values
    #[arg(long, env = "CANVASDB_CONFIG")]
    config: Option<PathBuf>,

    /// Keep everything in memory (nothing survives the process)
    #[arg(long)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Context tree operations
    #[command(subcommand)]
    Tree(TreeCommand),
    /// Layer registry operations
    #[command(subcommand)]
    Layer(LayerCommand),
    /// Document operations
    #[command(subcommand)]
    Doc(DocCommand),
}

#[derive(Subcommand)]
enum TreeCommand {
    /// Create a path, adding missing layers
    Insert { path: String },
    /// Move a node under another parent path
    Move {
        from: String,
        to: String,
        /// Carry the whole subtree instead of splicing children up
        #[arg(long)]
        recursive: bool,
    },
    /// Remove a node
    Remove {
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Print every leaf path
    List,
}

#[derive(Subcommand)]
enum LayerCommand {
    Create {
        name: String,
        /// universe, workspace, canvas, context, filter or label
        #[arg(long = "type", default_value = "context")]
        layer_type: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    List,
    Rename { name: String, new_name: String },
    Remove {
        name: String,
        /// Also delete the bitmaps the layer owns
        #[arg(long)]
        destroy: bool,
    },
}

#[derive(Subcommand)]
enum DocCommand {
    /// Insert a document given as a JSON object
    Insert {
        schema: String,
        data: String,
        /// Context path (repeatable)
        #[arg(long = "context", short = 'c')]
        contexts: Vec<String>,
        /// Feature key (repeatable)
        #[arg(long = "feature", short = 'f')]
        features: Vec<String>,
    },
    List {
        #[arg(long = "context", short = 'c')]
        contexts: Vec<String>,
        #[arg(long = "feature", short = 'f')]
        features: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print full documents instead of ids
        #[arg(long)]
        documents: bool,
    },
    Get { id: u32 },
    Delete { id: u32 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<CanvasConfig> {
    let mut config = match &args.config {
        Some(path) => CanvasConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CanvasConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if args.in_memory {
        config.storage = StorageMode::InMemory;
    }
    Ok(config)
}

fn run_tree(canvas: &Canvas, cmd: TreeCommand) -> Result<()> {
    let tree = canvas.tree();
    match cmd {
        TreeCommand::Insert { path } => {
            let created = tree.insert(&path)?;
            print_json(&serde_json::json!({ "path": path, "created": created }))
        }
        TreeCommand::Move {
            from,
            to,
            recursive,
        } => {
            tree.move_node(&from, &to, recursive)?;
            print_json(&tree.list_paths())
        }
        TreeCommand::Remove { path, recursive } => {
            tree.remove(&path, recursive)?;
            print_json(&tree.list_paths())
        }
        TreeCommand::List => print_json(&tree.list_paths()),
    }
}

fn run_layer(canvas: &Canvas, cmd: LayerCommand) -> Result<()> {
    match cmd {
        LayerCommand::Create {
            name,
            layer_type,
            description,
            color,
        } => {
            let mut options = LayerOptions::for_type(&layer_type)?;
            if let Some(description) = description {
                options = options.with_description(description);
            }
            if let Some(color) = color {
                options = options.with_color(color);
            }
            match canvas.create_layer(&name, options)? {
                Some(layer) => print_json(&layer),
                None => bail!("layer '{}' already exists", name),
            }
        }
        LayerCommand::List => print_json(&canvas.layers().list()),
        LayerCommand::Rename { name, new_name } => {
            print_json(&canvas.layers().rename(&name, &new_name)?)
        }
        LayerCommand::Remove { name, destroy } => {
            let layer = if destroy {
                canvas.destroy_layer(&name)?
            } else {
                canvas.remove_layer(&name)?
            };
            print_json(&layer)
        }
    }
}

fn run_doc(canvas: &Canvas, cmd: DocCommand) -> Result<()> {
    let documents = canvas.documents();
    match cmd {
        DocCommand::Insert {
            schema,
            data,
            contexts,
            features,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("document data must be JSON")?;
            let id = documents.insert(NewDocument::new(schema, data), &contexts, &features)?;
            print_json(&serde_json::json!({ "id": id }))
        }
        DocCommand::List {
            contexts,
            features,
            limit,
            documents: full,
        } => {
            let options = ListOptions {
                limit,
                return_metadata: full,
            };
            print_json(&documents.list(&contexts, &features, &options)?)
        }
        DocCommand::Get { id } => match documents.get(id)? {
            Some(doc) => print_json(&doc),
            None => bail!("document {} not found", id),
        },
        DocCommand::Delete { id } => print_json(&documents.delete(id)?),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        "Starting canvasdb v{} ({:?}, {})",
        canvasdb::VERSION,
        config.storage,
        config.data_dir.display()
    );

    let canvas = Canvas::open(config)?;
    match args.command {
        Command::Tree(cmd) => run_tree(&canvas, cmd)?,
        Command::Layer(cmd) => run_layer(&canvas, cmd)?,
        Command::Doc(cmd) => run_doc(&canvas, cmd)?,
    }
    canvas.persist()?;
    Ok(())
}
