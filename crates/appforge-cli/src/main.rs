//! appforge CLI: deploy templates and manage deployed apps.
//!
//! Talks to the appforge server over its REST API and runs the wizard and
//! section-edit flows from `appforge-core` locally, so every check the
//! browser UI makes happens here too before anything is sent.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod client;
mod input;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use appforge_core::credential::{
    CredentialFetch, CredentialFormat, CredentialSelector, DEFAULT_CREDENTIAL_PATTERN, mask,
};
use appforge_core::deploy::DeploymentOrchestrator;
use appforge_core::form::{FieldView, FormView};
use appforge_core::persistence::Persistence;
use appforge_core::preview::{Device, SANDBOX_CSP, compute_preview, frame};
use appforge_core::resolver::placeholders;
use appforge_core::schema::Template;
use appforge_core::session::{Notification, NotificationLevel, SessionOptions, delete_deployed_app};
use appforge_core::store::ConfigStore;
use appforge_core::validator::JsonSchemaValidator;
use appforge_core::view_state::{MemoryViewState, StoredViewState, ViewStatePersistence, WizardStep};
use appforge_core::{EditSession, FieldValue, WizardSession};
use appforge_storage::RedbBackend;

use client::{HttpCredentialSelector, HttpPersistence};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// appforge: configurable mini-apps from templates.
#[derive(Parser)]
#[command(
    name = "appforge",
    version,
    about = "appforge CLI: deploy templates and edit deployed apps",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         APPFORGE_ADDR               Server address (default: http://127.0.0.1:8300)\n  \
         APPFORGE_TOKEN              Admin token\n  \
         APPFORGE_KEYS_URL           Key service listing your API keys\n  \
         APPFORGE_KEYS_FALLBACK_URL  Tried when the key service denies access\n  \
         APPFORGE_API_KEY            API key used by deploy and edit\n\n\
         {DIM}Examples:{RESET}\n  \
         appforge templates\n  \
         appforge deploy chat-assistant --name 'Support Bot' --set general.title='Support'\n  \
         appforge edit support-bot --section styling --set primary_color='#000000'\n  \
         appforge preview --template-file chat.json --set general.title=Hi --out preview.html"
    ),
)]
struct Cli {
    /// appforge server address.
    #[arg(long, env = "APPFORGE_ADDR", default_value = "http://127.0.0.1:8300", global = true)]
    addr: String,

    /// Admin token.
    #[arg(long, env = "APPFORGE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Key service endpoint listing the user's API keys.
    #[arg(long, env = "APPFORGE_KEYS_URL", global = true)]
    keys_url: Option<String>,

    /// Secondary key endpoint, tried when the first one answers 401/403.
    #[arg(long, env = "APPFORGE_KEYS_FALLBACK_URL", global = true)]
    keys_fallback_url: Option<String>,

    /// Regular expression API keys must match.
    #[arg(long, env = "APPFORGE_CREDENTIAL_PATTERN", global = true)]
    credential_pattern: Option<String>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server health.
    Health,
    /// List available templates.
    Templates,
    /// Show a template's sections, fields and placeholders.
    Template {
        /// Template slug or id.
        slug: String,
    },
    /// Deploy a template as a new app.
    Deploy {
        /// Template slug or id.
        template: String,
        /// App name.
        #[arg(long)]
        name: String,
        /// App slug; derived from the name when omitted.
        #[arg(long)]
        slug: Option<String>,
        /// Set a configuration value (path=value, value parsed as JSON if possible).
        #[arg(long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,
        /// JSON file with configuration values.
        #[arg(long)]
        values: Option<PathBuf>,
        /// API key for the app.
        #[arg(long, env = "APPFORGE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Pick the API key with this id from the key service.
        #[arg(long, conflicts_with = "api_key")]
        key_id: Option<String>,
        /// Text files to upload and attach to the app.
        #[arg(long = "upload", value_name = "FILE")]
        upload: Vec<PathBuf>,
        /// Directory remembering wizard progress between runs.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// List deployed apps.
    Apps,
    /// Show a deployed app.
    App {
        slug: String,
    },
    /// Change and save one section of a deployed app.
    Edit {
        slug: String,
        /// Section to edit.
        #[arg(long)]
        section: String,
        /// Set a value inside the section (path=value, relative to the section).
        #[arg(long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,
        /// Replace the app's API key.
        #[arg(long, env = "APPFORGE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Refuse to overwrite changes made since the app was loaded.
        #[arg(long)]
        strict: bool,
    },
    /// Rename or (de)activate a deployed app.
    Settings {
        slug: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "inactive")]
        active: bool,
        #[arg(long)]
        inactive: bool,
    },
    /// Render a template with configuration values.
    Preview {
        /// Template slug or id on the server.
        #[arg(long, conflicts_with = "template_file", required_unless_present = "template_file")]
        template: Option<String>,
        /// Template JSON file; renders without contacting the server.
        #[arg(long)]
        template_file: Option<PathBuf>,
        /// Set a configuration value (path=value).
        #[arg(long = "set", value_name = "PATH=VALUE")]
        set: Vec<String>,
        /// JSON file with configuration values.
        #[arg(long)]
        values: Option<PathBuf>,
        /// Device frame: desktop, tablet, mobile or fullscreen.
        #[arg(long, default_value = "desktop")]
        device: Device,
        /// Emit the bare document instead of the framed page.
        #[arg(long)]
        document: bool,
        /// Write to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a deployed app.
    Delete {
        slug: String,
        /// Type the app's slug to confirm.
        #[arg(long)]
        confirm: String,
    },
    /// List the API keys available from the key service.
    Credentials,
}

// ── Output helpers ───────────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn failure(msg: &str) {
    println!("{RED}{BOLD}✗{RESET} {msg}");
}

fn print_notifications(notifications: &[Notification]) {
    for n in notifications {
        match n.level {
            NotificationLevel::Success => success(&n.message),
            NotificationLevel::Error => warning(&n.message),
        }
    }
}

fn print_field_errors(fields: &[FieldView]) {
    for field in fields {
        for error in &field.errors {
            failure(&format!("{}: {error}", field.path));
        }
        print_field_errors(&field.children);
        print_field_errors(&field.items);
    }
}

fn print_form_errors(form: &FormView) {
    for error in &form.screen_errors {
        failure(error);
    }
    if let Some(error) = &form.credential_error {
        failure(&format!("api key: {error}"));
    }
    for section in &form.sections {
        for error in section.errors.iter().chain(&section.commit_error) {
            failure(&format!("{}: {error}", section.key));
        }
        print_field_errors(&section.fields);
    }
}

fn print_template(template: &Template) {
    header("◆", &template.name);
    kv_line("Slug", &template.slug);
    kv_line("Id", &template.id);
    if !template.description.is_empty() {
        kv_line("Description", &template.description);
    }
    if !template.tags.is_empty() {
        kv_line("Tags", &template.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    for section in template.sections() {
        println!();
        println!("  {BOLD}{}{RESET} {DIM}({}){RESET}", section.title, section.key);
        for field in &section.fields {
            let required = if field.required { " *" } else { "" };
            let default = field
                .default
                .as_ref()
                .map(|d| format!(" {DIM}= {}{RESET}", d.to_text()))
                .unwrap_or_default();
            println!(
                "    {WHITE}{}{required}{RESET} {DIM}{:?}{RESET}{default}",
                field.key, field.field_type
            );
        }
    }
    let placeholders: Vec<String> = placeholders(&template.template_code)
        .iter()
        .map(ToString::to_string)
        .collect();
    if !placeholders.is_empty() {
        println!();
        kv_line("Placeholders", &placeholders.join(", "));
    }
}

fn credential_format(pattern: Option<&str>) -> Result<CredentialFormat> {
    CredentialFormat::new(pattern.unwrap_or(DEFAULT_CREDENTIAL_PATTERN))
        .context("invalid --credential-pattern")
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("APPFORGE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ── Main ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

struct Clients {
    server: Arc<HttpPersistence>,
    format: CredentialFormat,
    keys: HttpCredentialSelector,
}

async fn run(cli: Cli) -> Result<()> {
    let format = credential_format(cli.credential_pattern.as_deref())?;
    let ctx = Clients {
        server: Arc::new(HttpPersistence::new(&cli.addr, cli.token.clone())),
        keys: HttpCredentialSelector::new(
            cli.keys_url,
            cli.keys_fallback_url,
            cli.token,
            format.clone(),
        ),
        format,
    };

    match cli.command {
        Commands::Health => cmd_health(&ctx).await,
        Commands::Templates => cmd_templates(&ctx).await,
        Commands::Template { slug } => cmd_template(&ctx, &slug).await,
        Commands::Deploy {
            template,
            name,
            slug,
            set,
            values,
            api_key,
            key_id,
            upload,
            state_dir,
        } => {
            cmd_deploy(
                &ctx,
                DeployArgs {
                    template,
                    name,
                    slug,
                    set,
                    values,
                    api_key,
                    key_id,
                    upload,
                    state_dir,
                },
            )
            .await
        }
        Commands::Apps => cmd_apps(&ctx).await,
        Commands::App { slug } => cmd_app(&ctx, &slug).await,
        Commands::Edit {
            slug,
            section,
            set,
            api_key,
            strict,
        } => cmd_edit(&ctx, &slug, &section, &set, api_key.as_deref(), strict).await,
        Commands::Settings {
            slug,
            name,
            active,
            inactive,
        } => {
            let is_active = match (active, inactive) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_settings(&ctx, &slug, name, is_active).await
        }
        Commands::Preview {
            template,
            template_file,
            set,
            values,
            device,
            document,
            out,
        } => {
            let template = match (template, template_file) {
                (_, Some(file)) => read_template_file(&file)?,
                (Some(slug), None) => ctx.server.get_template(&slug).await?,
                (None, None) => bail!("pass --template or --template-file"),
            };
            cmd_preview(&template, &set, values.as_deref(), device, document, out.as_deref())
        }
        Commands::Delete { slug, confirm } => cmd_delete(&ctx, &slug, &confirm).await,
        Commands::Credentials => cmd_credentials(&ctx).await,
    }
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_health(ctx: &Clients) -> Result<()> {
    let health = ctx.server.health().await?;
    header("◉", "Server Health");
    for key in ["status", "version", "storage", "server_time"] {
        if let Some(value) = health.get(key).and_then(serde_json::Value::as_str) {
            kv_line(key, value);
        }
    }
    Ok(())
}

async fn cmd_templates(ctx: &Clients) -> Result<()> {
    let templates = ctx.server.template_summaries().await?;
    header("◆", "Templates");
    if templates.is_empty() {
        println!("  {DIM}(none){RESET}");
    }
    for t in &templates {
        println!("  {BOLD}{}{RESET} {DIM}{}{RESET}", t.slug, t.name);
        if !t.description.is_empty() {
            println!("    {DIM}{}{RESET}", t.description);
        }
        println!("    {DIM}sections: {}{RESET}", t.sections.join(", "));
    }
    Ok(())
}

async fn cmd_template(ctx: &Clients, slug: &str) -> Result<()> {
    let template = ctx.server.get_template(slug).await?;
    print_template(&template);
    Ok(())
}

struct DeployArgs {
    template: String,
    name: String,
    slug: Option<String>,
    set: Vec<String>,
    values: Option<PathBuf>,
    api_key: Option<String>,
    key_id: Option<String>,
    upload: Vec<PathBuf>,
    state_dir: Option<PathBuf>,
}

fn view_state(state_dir: Option<&Path>) -> Result<Arc<dyn ViewStatePersistence>> {
    let Some(dir) = state_dir else {
        return Ok(Arc::new(MemoryViewState::new()));
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let backend = RedbBackend::open(dir.join("wizard.redb")).context("failed to open wizard state")?;
    Ok(Arc::new(StoredViewState::new(Arc::new(backend))))
}

async fn cmd_deploy(ctx: &Clients, args: DeployArgs) -> Result<()> {
    let template = ctx
        .server
        .get_template(&args.template)
        .await
        .with_context(|| format!("template '{}'", args.template))?;
    let persistence: Arc<dyn Persistence> = ctx.server.clone();
    let orchestrator = DeploymentOrchestrator::new(persistence, ctx.format.clone())
        .with_validator(Arc::new(JsonSchemaValidator::new()));
    let mut wizard = WizardSession::start(template, view_state(args.state_dir.as_deref())?, orchestrator).await;

    // Details
    wizard.set_name(&args.name);
    if let Some(slug) = &args.slug {
        wizard.set_slug(slug);
    }
    if let Some(key) = &args.api_key {
        wizard.select_credential(key);
    } else if let Some(id) = &args.key_id {
        let fetch = wizard.load_credentials(&ctx.keys).await;
        print_notifications(&wizard.drain_notifications());
        let Some(credential) = fetch.credentials().iter().find(|c| c.id == *id) else {
            bail!("no API key with id '{id}' is available");
        };
        wizard.select_credential(&credential.key);
    }
    wizard.next_step().await;

    // Configure
    let mut assignments = match &args.values {
        Some(file) => input::load_values(file)?,
        None => Vec::new(),
    };
    assignments.extend(input::parse_assignments(&args.set)?);
    for (path, value) in assignments {
        wizard
            .on_change(&path, value)
            .with_context(|| format!("cannot set '{path}'"))?;
    }
    if !args.upload.is_empty() {
        let session = wizard
            .upload_session()
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), ToOwned::to_owned);
        for file in &args.upload {
            let artifact = ctx
                .server
                .upload_pending_artifact(&session, input::read_upload(file)?)
                .await
                .with_context(|| format!("failed to upload {}", file.display()))?;
            kv_line("Uploaded", &format!("{} ({} bytes)", artifact.file_name, artifact.size));
        }
        wizard.set_upload_session(&session).await;
    }
    wizard.next_step().await;

    // Review
    let view = wizard.view();
    if !view.deploy_enabled {
        for error in &view.metadata_errors {
            failure(&error.to_string());
        }
        print_form_errors(&view.form);
        if wizard.step() == WizardStep::Review && args.state_dir.is_some() {
            warning("progress saved; fix the values above and run deploy again");
        }
        bail!("deployment is not valid");
    }

    let result = wizard.deploy().await;
    print_notifications(&wizard.drain_notifications());
    let receipt = result?;

    header("▲", "Deployed");
    kv_line("Name", &receipt.app.name);
    kv_line("Slug", &receipt.app.slug);
    kv_line("Id", &receipt.app.id.to_string());
    kv_line("URL", &receipt.app.public_url);
    if !receipt.attached.is_empty() {
        kv_line("Attached files", &receipt.attached.len().to_string());
    }
    Ok(())
}

async fn cmd_apps(ctx: &Clients) -> Result<()> {
    let apps = ctx.server.app_summaries().await?;
    header("▣", "Deployed Apps");
    if apps.is_empty() {
        println!("  {DIM}(none){RESET}");
    }
    for app in &apps {
        let state = if app.is_active {
            format!("{GREEN}active{RESET}")
        } else {
            format!("{YELLOW}inactive{RESET}")
        };
        println!("  {BOLD}{}{RESET} {} {state} {DIM}v{}{RESET}", app.slug, app.name, app.version);
        println!("    {DIM}{}  (template {}){RESET}", app.public_url, app.template_ref);
    }
    Ok(())
}

async fn cmd_app(ctx: &Clients, slug: &str) -> Result<()> {
    let app = ctx.server.get_deployed_app(slug).await?;
    header("▣", &app.name);
    kv_line("Slug", &app.slug);
    kv_line("Id", &app.id.to_string());
    kv_line("Active", &app.is_active.to_string());
    kv_line("Template", &app.template_ref);
    kv_line("URL", &app.public_url);
    kv_line("Version", &app.version.to_string());
    kv_line("Updated", &app.updated_at.to_rfc3339());

    let mut configuration = app.configuration.clone();
    if let FieldValue::Object(map) = &mut configuration {
        if let Some(key) = map.get_mut(appforge_core::credential::CREDENTIAL_KEY) {
            *key = FieldValue::text(key.as_str().map(mask).unwrap_or_default());
        }
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::from(&configuration))?
    );
    Ok(())
}

async fn cmd_edit(
    ctx: &Clients,
    slug: &str,
    section: &str,
    set: &[String],
    api_key: Option<&str>,
    strict: bool,
) -> Result<()> {
    let options = SessionOptions {
        format: ctx.format.clone(),
        strict_versioning: strict,
        ..SessionOptions::default()
    };
    let mut session = EditSession::open(&*ctx.server, slug, options).await?;
    session.edit_section(section)?;
    if let Some(key) = api_key {
        session.select_credential(key);
    }
    for (path, value) in input::parse_assignments(set)? {
        let full = if path == section || path.starts_with(&format!("{section}.")) {
            path
        } else {
            format!("{section}.{path}")
        };
        session
            .on_change(&full, value)
            .with_context(|| format!("cannot set '{full}'"))?;
    }

    let result = session.commit_section(&*ctx.server, section).await;
    print_notifications(&session.drain_notifications());
    if result.is_err() {
        if let Some(view) = session.form().section(section) {
            print_field_errors(&view.fields);
        }
    }
    result?;
    kv_line("Version", &session.app().version.to_string());
    Ok(())
}

async fn cmd_settings(ctx: &Clients, slug: &str, name: Option<String>, is_active: Option<bool>) -> Result<()> {
    if name.is_none() && is_active.is_none() {
        bail!("nothing to change; pass --name, --active or --inactive");
    }
    let mut session = EditSession::open(&*ctx.server, slug, SessionOptions::default()).await?;
    let result = session
        .update_settings(&*ctx.server, name, is_active)
        .await
        .map(|app| (app.name.clone(), app.is_active));
    print_notifications(&session.drain_notifications());
    let (name, active) = result?;
    kv_line("Name", &name);
    kv_line("Active", &active.to_string());
    Ok(())
}

fn read_template_file(path: &Path) -> Result<Template> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a template", path.display()))
}

fn cmd_preview(
    template: &Template,
    set: &[String],
    values: Option<&Path>,
    device: Device,
    document_only: bool,
    out: Option<&Path>,
) -> Result<()> {
    let mut store = ConfigStore::new(template.defaults());
    let mut assignments = match values {
        Some(file) => input::load_values(file)?,
        None => Vec::new(),
    };
    assignments.extend(input::parse_assignments(set)?);
    for (path, value) in assignments {
        store
            .set_raw(&path, value)
            .with_context(|| format!("cannot set '{path}'"))?;
    }

    let document = compute_preview(Some(&template.template_code), Some(store.tree()));
    let html = if document_only {
        document
    } else {
        frame(&document, device)
    };

    match out {
        Some(path) => {
            std::fs::write(path, &html).with_context(|| format!("failed to write {}", path.display()))?;
            success(&format!("Preview written to {}", path.display()));
            if document_only {
                println!("  {DIM}serve it with Content-Security-Policy: {SANDBOX_CSP}{RESET}");
            }
        }
        None => println!("{html}"),
    }
    Ok(())
}

async fn cmd_delete(ctx: &Clients, slug: &str, confirm: &str) -> Result<()> {
    delete_deployed_app(&*ctx.server, slug, confirm).await?;
    success(&format!("Deleted '{slug}'"));
    Ok(())
}

async fn cmd_credentials(ctx: &Clients) -> Result<()> {
    header("⚿", "API Keys");
    match ctx.keys.list_credentials().await {
        CredentialFetch::Live(credentials) => {
            if credentials.is_empty() {
                println!("  {DIM}(none){RESET}");
            }
            for c in &credentials {
                let label = if c.label.is_empty() { &c.id } else { &c.label };
                let valid = if ctx.keys.validate_format(Some(c.key.as_str())).is_ok() {
                    String::new()
                } else {
                    format!(" {YELLOW}(unexpected format){RESET}")
                };
                println!("  {BOLD}{}{RESET} {label} {DIM}{}{RESET}{valid}", c.id, c.masked());
            }
        }
        CredentialFetch::Fallback { reason } => {
            warning(&format!("Could not load your API keys ({reason}); pass --api-key instead"));
        }
    }
    Ok(())
}
