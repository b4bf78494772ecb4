use anyhow::{Result, anyhow};
use rocket::{
    Build, Config, Rocket,
    data::{Limits, ToByteUnit},
    figment::Figment,
};
use tracing::info;
use vision_chat_assets::{ModelSource, resolve_model_files};
use vision_chat_config::{
    AppConfig, ConfigOverrides, LocalFileSystem, VirtualFileSystem, VirtualPath,
};
use vision_chat_core::{
    BackboneRegistry, ModelLoadArgs, load_model,
    runtime::{describe_device, prepare_device_and_dtype},
};

use crate::{args::Args, cors::Cors, routes, state::AppState};

pub const APP_NAME: &str = "vision-chat";

/// Provision the model, then bind the listener. Any error here is a startup failure.
pub async fn run(args: Args, registry: BackboneRegistry) -> Result<()> {
    let fs = LocalFileSystem::new(APP_NAME);
    let (app_config, descriptor) = AppConfig::load_with_overrides(&fs, &ConfigOverrides::from(&args))?;
    info!(
        "Using configuration {}",
        descriptor.location.display_with(&fs)?
    );
    let state = load_state(&fs, &app_config, &registry)?;
    info!(
        "Server ready on {}:{}",
        app_config.server.host, app_config.server.port
    );
    build_rocket(state, server_figment(&app_config))
        .launch()
        .await
        .map_err(|err| anyhow!("rocket failed: {err}"))?;

    Ok(())
}

/// Resolve the configured checkpoint and load it with a registered backbone.
pub fn load_state(
    fs: &impl VirtualFileSystem,
    app_config: &AppConfig,
    registry: &BackboneRegistry,
) -> Result<AppState> {
    let model_id = app_config.model_id()?.to_owned();

    let cache_dir = VirtualPath::hub_cache();
    fs.ensure_dir(&cache_dir)?;
    let cache_dir = fs.with_physical_path(&cache_dir, |path| Ok(path.to_path_buf()))?;
    let source = ModelSource::new(model_id.clone(), app_config.model.revision.clone())
        .with_cache_dir(cache_dir);
    let files = resolve_model_files(&source)?;

    let (device, dtype) =
        prepare_device_and_dtype(app_config.inference.device, app_config.inference.precision)?;
    info!(
        "Loading model `{model_id}` on {} ({dtype:?})",
        describe_device(&device)
    );
    let model = load_model(
        ModelLoadArgs {
            files,
            device,
            dtype,
            max_memory: app_config.inference.max_memory,
        },
        registry,
    )?;
    info!("Model loaded");
    Ok(AppState::new(Box::new(model), model_id))
}

pub fn server_figment(config: &AppConfig) -> Figment {
    Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.host.clone()))
        .merge((
            "limits",
            Limits::default().limit("bytes", config.body_limit_bytes().bytes()),
        ))
}

pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(Cors)
        .manage(state)
        .mount("/", routes::root_routes())
        .mount("/v1", routes::v1_routes())
        .register("/v1", routes::v1_catchers())
}
