// Catalog search entry point
//
// Loads a JSON catalog seed into the in-memory engine and runs one search.
// Usage: catalog_search [--seed FILE] [--lang en] [--country GB] [--limit 20]
//                       [--cursor TOKEN] [--family NAME] [QUERY...]
// The seed path falls back to CATALOG_SEED; engine settings come from CATALOG_*.

use std::sync::Arc;

use anyhow::{bail, Context};
use plant_catalog::{CatalogConfig, CatalogSeed, Locale, PlantCatalog, QueryEngine, SearchFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    seed: Option<String>,
    language: Option<String>,
    country: Option<String>,
    limit: Option<usize>,
    cursor: Option<String>,
    family: Option<String>,
    query: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        seed: None,
        language: None,
        country: None,
        limit: None,
        cursor: None,
        family: None,
        query: Vec::new(),
    };
    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        let mut value = |flag: &str| raw.next().with_context(|| format!("{} needs a value", flag));
        match arg.as_str() {
            "--seed" => args.seed = Some(value("--seed")?),
            "--lang" => args.language = Some(value("--lang")?),
            "--country" => args.country = Some(value("--country")?),
            "--limit" => {
                args.limit = Some(value("--limit")?.parse().context("--limit must be a number")?)
            }
            "--cursor" => args.cursor = Some(value("--cursor")?),
            "--family" => args.family = Some(value("--family")?),
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            _ => args.query.push(arg),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plant_catalog=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args()?;
    let config = CatalogConfig::from_env();
    let seed_path = args
        .seed
        .clone()
        .or_else(|| std::env::var("CATALOG_SEED").ok())
        .context("no seed file: pass --seed or set CATALOG_SEED")?;

    tracing::info!("Configuration:");
    tracing::info!("  CATALOG_SEED: {}", seed_path);
    tracing::info!("  default language: {}", config.default_language);

    let language = args
        .language
        .clone()
        .unwrap_or_else(|| config.default_language.clone());
    let locale = Locale::new(&language, args.country.as_deref())?;

    let engine = Arc::new(QueryEngine::new()?);
    let catalog = PlantCatalog::with_memory_cache(engine, config);
    let seed = CatalogSeed::from_path(&seed_path)?;
    seed.apply(&catalog).await?;

    let mut filter = SearchFilter::new();
    if let Some(family) = &args.family {
        filter = filter.with_family(family);
    }
    if let Some(limit) = args.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(cursor) = &args.cursor {
        filter = filter.with_cursor(cursor.clone());
    }

    let text = args.query.join(" ");
    let text = (!text.trim().is_empty()).then_some(text.as_str());
    let page = catalog.search(text, &filter, &locale).await?;

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
