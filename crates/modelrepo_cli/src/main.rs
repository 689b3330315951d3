//! Command-line probe for the collection loaders.
//!
//! # Responsibility
//! - Open a SQLite file and run one loader query described by flags.
//! - Print each model as one JSON object per line, then `found_rows=` when
//!   the query tracked it.

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use modelrepo_core::{
    init_logging, open_db, CachedCollectionLoader, Filter, Hooks, LoaderConfig, LoaderCriteria,
    LogTarget, Model, ModelCollectionLoader, ModelDescriptor, ModelFactory, Order, OrderMode,
    Value,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Load models from a SQLite table.
#[derive(Parser, Debug)]
#[command(name = "modelrepo")]
#[command(version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// Model type identifier
    #[arg(long = "type")]
    obj_type: String,

    /// Table holding the model rows
    #[arg(long)]
    table: String,

    /// Primary key column
    #[arg(long, default_value = "id")]
    key: String,

    /// Equality filter, `property=value`; repeatable
    #[arg(long = "filter", value_name = "PROPERTY=VALUE")]
    filters: Vec<String>,

    /// Sort order, `property` or `property:desc`; repeatable
    #[arg(long = "order", value_name = "PROPERTY[:asc|desc]")]
    orders: Vec<String>,

    /// Column to select and search; repeatable
    #[arg(long = "property")]
    properties: Vec<String>,

    /// Free-text match across the selected properties
    #[arg(long)]
    keyword: Option<String>,

    #[arg(long)]
    page: Option<u32>,

    #[arg(long = "per-page")]
    per_page: Option<u32>,

    /// Load by primary key instead of criteria; repeatable
    #[arg(long = "id")]
    ids: Vec<String>,

    /// Stream rows one at a time; criteria loads only
    #[arg(long, conflicts_with = "ids")]
    cursor: bool,

    /// Route loads through an in-memory cache
    #[arg(long)]
    cached: bool,

    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Absolute directory for rotating log files; stderr when omitted
    #[arg(long = "log-dir")]
    log_dir: Option<String>,
}

impl Args {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(&self.obj_type, &self.table)
            .with_key(&self.key)
            .with_properties(self.properties.iter().cloned())
    }

    fn apply_criteria<L: LoaderCriteria>(&self, loader: &mut L, default_page_size: u32) -> anyhow::Result<()> {
        for filter in &self.filters {
            let Some((property, value)) = filter.split_once('=') else {
                bail!("filter `{filter}` must look like property=value");
            };
            loader.add_filter(Filter::eq(property.trim(), value));
        }

        for order in &self.orders {
            let (property, mode) = match order.split_once(':') {
                Some((property, mode)) => {
                    let mode = OrderMode::parse(mode)
                        .with_context(|| format!("unknown order direction in `{order}`"))?;
                    (property, mode)
                }
                None => (order.as_str(), OrderMode::Asc),
            };
            let order = match mode {
                OrderMode::Asc => Order::asc(property.trim()),
                OrderMode::Desc => Order::desc(property.trim()),
            };
            loader.add_order(order);
        }

        if !self.properties.is_empty() {
            loader.set_properties(self.properties.iter().cloned());
        }
        if let Some(keyword) = &self.keyword {
            loader.add_keyword(keyword.as_str());
        }
        if self.page.is_some() || self.per_page.is_some() {
            loader
                .set_page(self.page.unwrap_or(1))
                .set_num_per_page(self.per_page.unwrap_or(default_page_size));
        }
        Ok(())
    }

    fn id_values(&self) -> Vec<Value> {
        self.ids.iter().map(Value::from).collect()
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = LoaderConfig::from_env().map_err(anyhow::Error::msg)?;

    let level = args.log_level.as_deref().unwrap_or(config.log_level);
    let target = match &args.log_dir {
        Some(dir) => LogTarget::directory(dir).map_err(anyhow::Error::msg)?,
        None => LogTarget::Stderr,
    };
    init_logging(level, target).map_err(anyhow::Error::msg)?;

    let conn = open_db(&args.db).with_context(|| format!("failed to open `{}`", args.db.display()))?;
    let factory = Arc::new(ModelFactory::new().with(args.descriptor()));
    let mut loader = ModelCollectionLoader::for_model(&conn, factory, &args.obj_type)?;
    args.apply_criteria(&mut loader, config.default_page_size)?;

    let mut out = std::io::stdout().lock();
    if !args.cached {
        return run_plain(&args, &mut loader, &mut out);
    }

    let pool = Arc::new(config.memory_pool());
    let mut cached =
        CachedCollectionLoader::new(loader, pool.clone()).with_namespace(config.cache_namespace.as_str());
    run_cached(&args, &mut cached, &mut out)?;

    let stats = pool.stats();
    info!(
        "event=cli_cache module=cli status=ok hits={} misses={} saves={} entries={}",
        stats.hits, stats.misses, stats.saves, stats.entries
    );
    Ok(())
}

fn run_plain(args: &Args, loader: &mut ModelCollectionLoader<'_>, out: &mut impl Write) -> anyhow::Result<()> {
    match args.ids.as_slice() {
        [] if args.cursor => {
            let mut cursor = loader.cursor(Hooks::none())?;
            let found_rows = cursor.found_rows();
            for model in cursor.models()? {
                print_model(out, &model?)?;
            }
            print_found_rows(out, found_rows)
        }
        [] => {
            let collection = loader.load()?;
            for model in &collection {
                print_model(out, model)?;
            }
            print_found_rows(out, collection.found_rows())
        }
        [id] => {
            if let Some(model) = loader.load_one(id.as_str())? {
                print_model(out, &model)?;
            }
            Ok(())
        }
        _ => {
            for model in loader.load_many(args.id_values())? {
                print_model(out, &model)?;
            }
            Ok(())
        }
    }
}

fn run_cached(args: &Args, loader: &mut CachedCollectionLoader<'_>, out: &mut impl Write) -> anyhow::Result<()> {
    if args.cursor {
        let mut cursor = loader.cursor(Hooks::none())?;
        let found_rows = cursor.found_rows();
        for model in cursor.models()? {
            print_model(out, &model?)?;
        }
        return print_found_rows(out, found_rows);
    }

    if args.ids.is_empty() {
        let collection = loader.load()?;
        for model in &collection {
            print_model(out, model)?;
        }
        return print_found_rows(out, collection.found_rows());
    }

    let models = loader.load_many(args.id_values())?;
    for id in &args.ids {
        if let Some(model) = models.get(id.as_str()) {
            print_model(out, model)?;
        }
    }
    Ok(())
}

fn print_model(out: &mut impl Write, model: &Model) -> anyhow::Result<()> {
    let line = serde_json::to_string(model.data()).context("failed to encode model")?;
    writeln!(out, "{line}")?;
    Ok(())
}

fn print_found_rows(out: &mut impl Write, found_rows: Option<u64>) -> anyhow::Result<()> {
    if let Some(found_rows) = found_rows {
        writeln!(out, "found_rows={found_rows}")?;
    }
    Ok(())
}
