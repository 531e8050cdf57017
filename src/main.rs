use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use storefront::{
    BackendConfig, ClientProvider, Storefront,
    config::ConfigArgs,
    models::{product::ProductFilters, upload::ImageFile},
    ui::{self, Notifier, Toast, ToastRenderer, format_price},
};

/// Admin command line for the storefront backend.
#[derive(Parser, Debug)]
#[command(author, version, about = "Storefront catalog and image admin")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Sign in before running the command (or STOREFRONT_EMAIL)
    #[arg(long, env = "STOREFRONT_EMAIL", global = true)]
    email: Option<String>,

    /// Password for --email (or STOREFRONT_PASSWORD)
    #[arg(long, env = "STOREFRONT_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Product catalog operations
    #[command(subcommand)]
    Products(ProductsCommand),

    /// Upload a product image
    Upload {
        file: PathBuf,
        /// Product the image belongs to
        #[arg(long)]
        product_id: Option<String>,
    },

    /// Show the signed-in user and whether they are an admin
    Whoami,
}

#[derive(Subcommand, Debug)]
enum ProductsCommand {
    /// List products, newest first
    List {
        /// Include products that are not public
        #[arg(long)]
        all: bool,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u64>,
        #[arg(long)]
        page_size: Option<u64>,
    },
    /// Show one product as JSON
    Get { id: Uuid },
    /// Delete a product
    Delete {
        id: Uuid,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Prints toasts to stderr; the process exits long before they would expire.
struct StderrRenderer;

impl ToastRenderer for StderrRenderer {
    fn show(&self, toast: &Toast) {
        eprintln!("{}", toast.message);
    }

    fn remove(&self, _toast: &Toast) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BackendConfig::from_env_and_args(cli.config);
    tracing::debug!(url = %config.url, bucket = %config.bucket, "configuration loaded");

    let provider = ClientProvider::new(config.clone());
    let handle = provider
        .initialize()
        .await
        .context("initializing backend client")?;
    let shop = Storefront::new(handle, &config);
    let toasts = Notifier::new(StderrRenderer);

    if let (Some(email), Some(password)) = (cli.email.as_deref(), cli.password.as_deref()) {
        shop.auth
            .sign_in(email, password)
            .await
            .context("signing in")?;
    }

    match cli.command {
        Command::Products(ProductsCommand::List {
            all,
            color,
            search,
            page,
            page_size,
        }) => {
            let filters = ProductFilters {
                color,
                search,
                page,
                page_size,
            };
            let result = if all {
                shop.catalog.list_all_products(&filters).await?
            } else {
                shop.catalog.list_public_products(&filters).await?
            };
            for product in &result.items {
                let price = product
                    .extra
                    .get("price")
                    .and_then(|v| v.as_f64())
                    .map(format_price)
                    .unwrap_or_else(|| "-".into());
                let visibility = if product.is_public { "public" } else { "hidden" };
                println!("{}  {:<32} {:>12}  {}", product.id, product.name, price, visibility);
            }
            println!("{} of {} products", result.items.len(), result.total_count);
        }
        Command::Products(ProductsCommand::Get { id }) => {
            let product = shop.catalog.get_product(id).await?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        Command::Products(ProductsCommand::Delete { id, yes }) => {
            if !yes && !ui::confirm(&format!("Delete product {id}?")) {
                bail!("aborted");
            }
            shop.catalog.delete_product(id).await?;
            toasts.success(format!("Deleted product {id}"));
        }
        Command::Upload { file, product_id } => {
            let image = read_image(&file).await?;
            match shop.storage.upload(&image, product_id.as_deref()).await {
                Ok(uploaded) => {
                    toasts.success("Image uploaded");
                    println!("{}\n{}", uploaded.path, uploaded.url);
                }
                Err(err) => {
                    toasts.error(err.to_string());
                    return Err(err.into());
                }
            }
        }
        Command::Whoami => match shop.auth.current_user().await? {
            Some(user) => {
                let admin = shop.auth.is_admin().await;
                println!(
                    "{} <{}>{}",
                    user.id,
                    user.email.unwrap_or_default(),
                    if admin { " (admin)" } else { "" }
                );
            }
            None => println!("not signed in"),
        },
    }

    Ok(())
}

/// Read a file from disk and guess its MIME type from the extension.
async fn read_image(path: &Path) -> Result<ImageFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let content_type = match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(ImageFile::new(name, content_type, bytes))
}
