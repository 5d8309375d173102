use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hero_select_core::{
    DocumentSource, FilterDefinitions, FilterSelections, LoaderOptions, MergeDirection,
    SelectError, Selection, Session, DEFAULT_DISPLAY_FIELD,
};
use hero_select_images::{
    CacheConfig, CachedImageProvider, HttpConfig, ImageProvider, DEFAULT_BASE_URL,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod interactive;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "hero-select")]
#[command(about = "Weighted random hero selection with attribute filters")]
struct Cli {
    #[command(flatten)]
    sources: SourceArgs,

    #[command(flatten)]
    images: ImageArgs,

    /// Seed the random source for reproducible draws.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(long, global = true, default_value = "config/hero_configuration.json")]
    attributes: PathBuf,
    #[arg(long, global = true, default_value = "config/default_hero_list.json")]
    preferences: PathBuf,
    #[arg(long, global = true, default_value = "config/gui_filter_configuration.json")]
    filter_config: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = MergeArg::PreferencesOverAttributes)]
    merge: MergeArg,
    #[arg(long, global = true, default_value_t = 0.0)]
    default_preference: f64,
    #[arg(long, global = true, default_value = DEFAULT_DISPLAY_FIELD)]
    display_field: String,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[arg(long, global = true, default_value = "images")]
    image_dir: PathBuf,
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    image_base_url: String,
    #[arg(long, global = true)]
    default_image: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = 10)]
    image_timeout_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Draw one or more entities from the filtered pool.
    Select(SelectArgs),
    /// Show the eligible entities and their selection probabilities.
    Probabilities(FilterArgs),
    /// List the merged catalog.
    Catalog,
    /// List the filter axes and their values.
    Filters,
    /// Load the session, then swap in a new preferences document.
    Reload(ReloadArgs),
    /// Read verbs from stdin, one per line, against a single session.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// `axis=value1,value2`; repeat for more axes. An empty value list does not restrict.
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long, default_value_t = 1)]
    count: usize,
    /// Resolve each selection's portrait through the image cache.
    #[arg(long, default_value_t = false)]
    fetch_image: bool,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Resolve portraits for every `select` verb.
    #[arg(long, default_value_t = false)]
    fetch_image: bool,
}

#[derive(Debug, Args)]
struct ReloadArgs {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MergeArg {
    PreferencesOverAttributes,
    AttributesOverPreferences,
}

impl From<MergeArg> for MergeDirection {
    fn from(value: MergeArg) -> Self {
        match value {
            MergeArg::PreferencesOverAttributes => Self::PreferencesOverAttributes,
            MergeArg::AttributesOverPreferences => Self::AttributesOverPreferences,
        }
    }
}

pub(crate) fn parse_filter(raw: &str) -> std::result::Result<(String, Vec<String>), String> {
    let (axis, values) =
        raw.split_once('=').ok_or_else(|| format!("expected `axis=value,...`, got `{raw}`"))?;
    let axis = axis.trim();
    if axis.is_empty() {
        return Err(format!("missing axis name in `{raw}`"));
    }
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    Ok((axis.to_string(), values))
}

pub(crate) fn selections_from(filters: Vec<(String, Vec<String>)>) -> FilterSelections {
    let mut selections = FilterSelections::new();
    for (axis, values) in filters {
        selections.entry(axis).or_default().extend(values);
    }
    selections
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

pub(crate) fn error_json(err: &anyhow::Error) -> Value {
    let code = err.downcast_ref::<SelectError>().map_or("error", SelectError::code);
    serde_json::json!({
        "error": {
            "code": code,
            "message": format!("{err:#}"),
        }
    })
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SelectError>() {
        Some(err) if err.is_load_error() => 2,
        Some(SelectError::NoMatch { .. }) => 3,
        Some(SelectError::EmptySubset | SelectError::DistributionMismatch { .. }) => 4,
        Some(SelectError::UnknownAttributeAxis(_)) => 5,
        _ => 1,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Err(emit_err) = emit_json(error_json(&err)) {
                eprintln!("error: failed to write error payload: {emit_err}");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Select(args) => {
            let mut session = open_session(&cli.sources, cli.seed)?;
            let provider = args.fetch_image.then(|| image_provider(&cli.images));
            run_select(&args, &mut session, provider.as_ref())
        }
        Command::Probabilities(args) => {
            let mut session = open_session(&cli.sources, cli.seed)?;
            run_probabilities(args, &mut session)
        }
        Command::Catalog => {
            let session = open_session(&cli.sources, cli.seed)?;
            run_catalog(&session)
        }
        Command::Filters => {
            let session = open_session(&cli.sources, cli.seed)?;
            run_filters(&cli.sources, &session)
        }
        Command::Reload(args) => {
            let mut session = open_session(&cli.sources, cli.seed)?;
            run_reload(&args, &mut session)
        }
        Command::Session(args) => {
            let mut session = open_session(&cli.sources, cli.seed)?;
            let provider = args.fetch_image.then(|| image_provider(&cli.images));
            let images = provider.as_ref().map(|provider| provider as &dyn ImageProvider);
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            interactive::run(&mut session, images, stdin.lock(), stdout.lock())
        }
    }
}

fn loader_options(sources: &SourceArgs) -> LoaderOptions {
    LoaderOptions {
        merge: sources.merge.into(),
        default_preference: sources.default_preference,
        display_field: sources.display_field.clone(),
    }
}

fn open_session(sources: &SourceArgs, seed: Option<u64>) -> Result<Session> {
    let attributes = DocumentSource::from_path(&sources.attributes)?;
    let preferences = DocumentSource::from_path(&sources.preferences)?;
    let options = loader_options(sources);
    let session = match seed {
        Some(seed) => Session::load_seeded(attributes, preferences, options, seed)?,
        None => Session::load(attributes, preferences, options)?,
    };
    Ok(session)
}

fn image_provider(args: &ImageArgs) -> CachedImageProvider {
    let mut config = CacheConfig::new(&args.image_dir);
    config.base_url.clone_from(&args.image_base_url);
    config.default_image.clone_from(&args.default_image);
    CachedImageProvider::with_http(
        config,
        &HttpConfig { timeout_secs: args.image_timeout_secs, ..HttpConfig::default() },
    )
}

pub(crate) fn selection_json(selection: &Selection, provider: Option<&dyn ImageProvider>) -> Value {
    let mut value = serde_json::json!({
        "id": selection.id,
        "display_name": selection.display_name,
        "display_reference": selection.display_reference,
        "preference": selection.preference,
        "probability": selection.probability,
        "subset_size": selection.subset_size,
    });
    if let (Some(provider), Value::Object(object)) = (provider, &mut value) {
        let image = provider.fetch(&selection.display_reference);
        object.insert(
            "image".to_string(),
            serde_json::json!({
                "origin": image.origin,
                "path": image.path,
                "bytes": image.bytes.len(),
            }),
        );
    }
    value
}

fn run_select(
    args: &SelectArgs,
    session: &mut Session,
    provider: Option<&CachedImageProvider>,
) -> Result<()> {
    let selections = selections_from(args.filter.filters.clone());
    if !selections.is_empty() {
        session.apply_filters(selections)?;
    }
    let provider = provider.map(|provider| provider as &dyn ImageProvider);
    let mut drawn = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let selection = session.select_one()?;
        drawn.push(selection_json(&selection, provider));
    }
    emit_json(serde_json::json!({
        "filters": session.selections(),
        "selections": drawn,
    }))
}

fn run_probabilities(args: FilterArgs, session: &mut Session) -> Result<()> {
    let selections = selections_from(args.filters);
    if !selections.is_empty() {
        session.apply_filters(selections)?;
    }
    let filters = serde_json::to_value(session.selections())?;
    let entities = session
        .active_entities()?
        .into_iter()
        .map(|weighted| {
            serde_json::json!({
                "id": weighted.entity.id,
                "display_name": weighted.entity.display_name(),
                "preference": weighted.entity.preference,
                "probability": weighted.probability,
            })
        })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "filters": filters,
        "subset_size": entities.len(),
        "entities": entities,
    }))
}

fn run_catalog(session: &Session) -> Result<()> {
    emit_json(serde_json::json!({
        "merge": session.options().merge,
        "entity_count": session.catalog().len(),
        "attributes": session.catalog().attribute_names(),
        "entities": session.catalog(),
    }))
}

fn run_filters(sources: &SourceArgs, session: &Session) -> Result<()> {
    let source = DocumentSource::from_path(&sources.filter_config)?;
    let definitions = FilterDefinitions::parse(&source)?;
    definitions
        .validate(session.catalog())
        .with_context(|| format!("filter definitions in {}", source.name()))?;
    emit_json(serde_json::json!({
        "source": source.name(),
        "axes": definitions.axes(),
    }))
}

fn run_reload(args: &ReloadArgs, session: &mut Session) -> Result<()> {
    let before = session.snapshot()?.fingerprint()?;
    let before_entities = session.catalog().len();
    let preferences = DocumentSource::from_path(&args.path)?;
    session.reload_preferences(preferences)?;
    let after = session.snapshot()?.fingerprint()?;
    emit_json(serde_json::json!({
        "preferences": session.preferences_source().name(),
        "before": { "entity_count": before_entities, "fingerprint": before },
        "after": { "entity_count": session.catalog().len(), "fingerprint": after },
    }))
}
