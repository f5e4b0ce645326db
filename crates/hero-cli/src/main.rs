use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hero_contracts::catalog::{CatalogRepository, CategoryId, JsonCatalog};
use hero_contracts::config::{paths, ConfigStore, HeroConfig};
use hero_contracts::events::EventWriter;
use hero_contracts::media::{FileStore, MediaDirectory};
use hero_engine::{
    init_logger, CancellationToken, DryrunProvider, GenerateOptions, GenerationSettings,
    HeroImagePipeline, HeroImageResponse, ImageGenerator, ImageProvider, PromptPreviewResponse,
    DEFAULT_NUM_PRODUCTS, DEFAULT_PREVIEW_PRODUCTS,
};

const ENV_MAPPING: &[(&str, &str)] = &[
    (paths::API_KEY, "OPENAI_API_KEY"),
    (paths::ORGANIZATION_ID, "OPENAI_ORGANIZATION"),
    (paths::API_BASE, "OPENAI_API_BASE"),
];

#[derive(Debug, Parser)]
#[command(name = "hero-rs", version, about = "AI category hero image generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a hero image and assign it to the category.
    Generate(GenerateArgs),
    /// Print the default prompt for a category.
    Prompt(PromptArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    #[arg(long, default_value = "hero-config.json")]
    config: PathBuf,
    #[arg(long, default_value = "catalog.json")]
    catalog: PathBuf,
    /// Store view code whose settings override the defaults.
    #[arg(long)]
    scope: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    category_id: CategoryId,
    #[arg(short = 'p', long, default_value_t = DEFAULT_NUM_PRODUCTS)]
    num_products: usize,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Store the image without pointing the category at it.
    #[arg(long)]
    no_assign: bool,
    /// Use this prompt instead of the generated one.
    #[arg(long)]
    prompt: Option<String>,
    /// Render offline placeholder images instead of calling OpenAI. No API key
    /// is needed; the module must still be enabled.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct PromptArgs {
    category_id: CategoryId,
    #[arg(short = 'p', long, default_value_t = DEFAULT_PREVIEW_PRODUCTS)]
    num_products: usize,
    #[command(flatten)]
    store: StoreArgs,
}

fn main() {
    init_logger();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("hero-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Prompt(args) => run_prompt(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = load_config(&args.store)?;
    let scope = args.store.scope.clone();
    let catalog: Arc<dyn CatalogRepository> = Arc::new(JsonCatalog::new(&args.store.catalog));
    let media = media_store(&config, scope.as_deref());

    let mut pipeline = if args.dryrun {
        let generator = ImageGenerator::new(
            Some(Arc::new(DryrunProvider) as Arc<dyn ImageProvider>),
            GenerationSettings::from_config(&config, scope.as_deref()),
        );
        HeroImagePipeline::new(config, scope, catalog, media, generator).offline()
    } else {
        HeroImagePipeline::from_config(config, scope, catalog, media)?
    };
    if let Some(events) = args.events.as_ref() {
        pipeline = pipeline.with_events(EventWriter::for_new_invocation(events));
    }

    let options = GenerateOptions {
        assign_to_category: !args.no_assign,
        prompt_override: args.prompt.clone(),
    };
    println!(
        "Generating hero image for category {} from {} product(s)...",
        args.category_id, args.num_products
    );
    let result = pipeline.generate_category_hero_image(
        args.category_id,
        args.num_products,
        &options,
        &CancellationToken::new(),
    );
    let response = HeroImageResponse::from_result(&result);

    if args.store.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        match &result {
            Ok(hero) => {
                println!("Strategy: {}", hero.strategy.as_str());
                println!("Saved: {}", hero.stored.path);
                println!("URL: {}", hero.stored.url);
                if options.assign_to_category {
                    println!("Category {} image updated.", hero.category_id);
                }
            }
            Err(err) => eprintln!("Error: {err}"),
        }
    }
    Ok(if response.success { 0 } else { 1 })
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let config = load_config(&args.store)?;
    let scope = args.store.scope.clone();
    let catalog: Arc<dyn CatalogRepository> = Arc::new(JsonCatalog::new(&args.store.catalog));
    let media = media_store(&config, scope.as_deref());
    // Preview never reaches the provider.
    let generator = ImageGenerator::new(
        None,
        GenerationSettings::from_config(&config, scope.as_deref()),
    );
    let pipeline = HeroImagePipeline::new(config, scope, catalog, media, generator);

    let result = pipeline.preview_prompt(args.category_id, args.num_products);
    let response = PromptPreviewResponse::from_result(&result);
    if args.store.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        match &result {
            Ok(prompt) => println!("{prompt}"),
            Err(err) => eprintln!("Error: {err}"),
        }
    }
    Ok(if response.success { 0 } else { 1 })
}

fn load_config(args: &StoreArgs) -> Result<HeroConfig> {
    let mut store = ConfigStore::load(&args.config)
        .with_context(|| format!("failed loading {}", args.config.display()))?;
    store.fill_from_env(ENV_MAPPING);
    log::debug!("configuration loaded from {}", args.config.display());
    Ok(HeroConfig::new(store))
}

fn media_store(config: &HeroConfig, scope: Option<&str>) -> Arc<dyn FileStore> {
    Arc::new(MediaDirectory::new(config.media_root(scope)))
}
