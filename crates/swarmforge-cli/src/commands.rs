//! Subcommand implementations.

use crate::context::AppContext;
use anyhow::{Context, bail};
use std::path::PathBuf;
use swarmforge_client::{ClientError, SessionEvent};
use swarmforge_core::{
    AssetKind, CustomModes, ErrorData, GenerationRequest, InboundMessage, Outbound, Plan,
    ProgressEvent, RunCustomMode, ScriptSpec, TaskList, TaskUpdate,
};
use tokio::sync::mpsc;
use tracing::warn;

fn print_update(update: &TaskUpdate) {
    let agent = update.agent.as_deref().unwrap_or("-");
    match update.description.as_deref() {
        Some(description) => println!(
            "[{}] {} ({agent}): {description}",
            update.task_id, update.status
        ),
        None => println!("[{}] {} ({agent})", update.task_id, update.status),
    }
    if let Some(details) = update.details.as_deref() {
        println!("    {details}");
    }
}

fn print_tasks(list: &TaskList) {
    for task in &list.tasks {
        let agent = task.agent.as_deref().unwrap_or("-");
        let description = task.description.as_deref().unwrap_or("");
        println!("  #{} {} ({agent}) {description}", task.id, task.kind);
    }
}

fn print_modes(modes: &CustomModes) {
    if modes.modes.is_empty() {
        println!("no modes available");
    }
    for mode in &modes.modes {
        match mode.description.as_deref() {
            Some(description) => println!("{}: {description}", mode.name),
            None => println!("{}", mode.name),
        }
    }
}

pub async fn modes(context: &AppContext) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_tx = tx.clone();
    let router = context.session.router();
    router
        .register::<CustomModes, _>(move |envelope| {
            let _ = tx.send(Ok(envelope.into_data()));
        })
        .await;
    router
        .register::<ErrorData, _>(move |envelope| {
            let _ = error_tx.send(Err(envelope.into_data().message));
        })
        .await;

    context.connect().await?;
    context.tagger.request_modes().await?;

    let wait = context.config.server.response_timeout();
    match tokio::time::timeout(wait, rx.recv()).await {
        Ok(Some(Ok(modes))) => {
            print_modes(&modes);
            Ok(())
        }
        Ok(Some(Err(message))) => bail!("orchestrator error: {message}"),
        Ok(None) => bail!("connection closed before the mode list arrived"),
        Err(_) => bail!("no mode list within {wait:?}"),
    }
}

pub async fn run_mode(
    context: &AppContext,
    name: String,
    system_prompt: Option<String>,
) -> anyhow::Result<()> {
    follow(
        context,
        RunCustomMode {
            mode: name,
            system_prompt,
        },
    )
    .await
}

pub async fn plan(
    context: &AppContext,
    prompt: String,
    system_prompt: Option<String>,
) -> anyhow::Result<()> {
    follow(
        context,
        Plan {
            prompt,
            system_prompt,
        },
    )
    .await
}

/// Send `data` and print its correlated task updates until a terminal one.
async fn follow<T: Outbound>(context: &AppContext, data: T) -> anyhow::Result<()> {
    let router = context.session.router();
    router
        .register::<TaskList, _>(|envelope| {
            println!("planned tasks:");
            print_tasks(envelope.data());
        })
        .await;
    router
        .register::<ErrorData, _>(|envelope| {
            eprintln!("orchestrator error: {}", envelope.data().message);
        })
        .await;

    context.connect().await?;
    let mut pending = context.tagger.request::<T, TaskUpdate>(data).await?;
    let request_id = pending.request_id().to_string();
    println!("sent {} as {request_id}", T::TYPE);

    let wait = context.config.server.response_timeout();
    loop {
        tokio::select! {
            next = pending.next(wait) => match next {
                Ok(envelope) => {
                    let update = envelope.into_data();
                    print_update(&update);
                    if update.outcome().is_terminal() {
                        return Ok(());
                    }
                }
                Err(ClientError::Timeout(message)) => {
                    warn!(%message, "gave up waiting for task updates");
                    bail!("no further task updates within {wait:?}");
                }
                Err(error) => return Err(error.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                context.tagger.cancel_task(request_id).await?;
                println!("cancel requested");
                return Ok(());
            }
        }
    }
}

/// Build a request whose parameter block is read from `params`.
fn build_request(
    asset_type: String,
    name: String,
    description: String,
    params: Option<PathBuf>,
) -> anyhow::Result<GenerationRequest> {
    let mut request = GenerationRequest::new(asset_type, name).with_description(description);
    let Some(path) = params else {
        return Ok(request);
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parse_error = || format!("{} is not a valid parameter block", path.display());
    match AssetKind::from_tag(&request.asset_type) {
        Some(AssetKind::Primitive) => {
            request.primitive = Some(serde_json::from_str(&text).with_context(parse_error)?);
        }
        Some(AssetKind::Scripting) => {
            request.script = Some(serde_json::from_str(&text).with_context(parse_error)?);
        }
        Some(AssetKind::Image) => {
            request.image = Some(serde_json::from_str(&text).with_context(parse_error)?);
        }
        Some(AssetKind::Procedural) => {
            request.procedural = Some(serde_json::from_str(&text).with_context(parse_error)?);
        }
        None => {
            request.custom_properties =
                serde_json::from_str(&text).with_context(parse_error)?;
        }
    }
    Ok(request)
}

pub async fn generate(
    context: &AppContext,
    asset_type: String,
    name: String,
    description: String,
    params: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = build_request(asset_type, name, description, params)?;
    let kind = AssetKind::from_tag(&request.asset_type);
    if context.needs_connection() && kind == Some(AssetKind::Scripting) {
        context.connect().await?;
    }

    let correlation_id = swarmforge_client::RequestTagger::new_request_id();
    let mut progress = context.engine.subscribe_progress();
    let print_progress = |event: ProgressEvent| {
        if event.request_id == correlation_id {
            println!("{:>5.1}% {}", event.fraction * 100.0, event.status_text);
        }
    };

    let dispatch = context.engine.dispatch(&request, &correlation_id);
    tokio::pin!(dispatch);
    let result = loop {
        tokio::select! {
            result = &mut dispatch => break result,
            Ok(event) = progress.recv() => print_progress(event),
            _ = tokio::signal::ctrl_c() => {
                let sent = context.engine.cancel(&request.asset_type, &correlation_id).await;
                bail!("interrupted (cancel sent: {sent})");
            }
        }
    };
    while let Ok(event) = progress.try_recv() {
        print_progress(event);
    }

    match (result.asset_locator(), result.error()) {
        (Some(locator), _) => {
            println!("generated {locator}");
            Ok(())
        }
        (None, Some(error)) => bail!("generation failed: {error}"),
        (None, None) => bail!("generation failed"),
    }
}

pub async fn script(
    context: &AppContext,
    name: String,
    description: String,
    target: Option<String>,
) -> anyhow::Result<()> {
    if context.needs_connection() {
        context.connect().await?;
    }
    let spec = ScriptSpec {
        name,
        description,
        target_game_object: target,
    };
    let correlation_id = swarmforge_client::RequestTagger::new_request_id();
    let result = context.engine.generate_script(&spec, &correlation_id).await;
    match (result.asset_locator(), result.error()) {
        (Some(locator), _) => {
            println!("generated {locator}");
            Ok(())
        }
        (None, Some(error)) => bail!("script generation failed: {error}"),
        (None, None) => bail!("script generation failed"),
    }
}

pub async fn validate_script(context: &AppContext, path: PathBuf) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if context.needs_connection() {
        context.connect().await?;
    }
    let correlation_id = swarmforge_client::RequestTagger::new_request_id();
    match context.engine.validate_script(&content, &correlation_id).await {
        Ok(true) => {
            println!("{} is valid", path.display());
            Ok(())
        }
        Ok(false) => bail!("{} was rejected", path.display()),
        Err(error) => bail!("validation failed: {error}"),
    }
}

pub async fn watch(context: &AppContext) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    context.session.router().forward_all(tx).await;
    let mut events = context.session.subscribe();

    context.connect().await?;
    println!("watching {} (Ctrl-C to stop)", context.session.endpoint().await);

    loop {
        tokio::select! {
            Some(message) = rx.recv() => match message {
                InboundMessage::TaskUpdate(envelope) => print_update(envelope.data()),
                InboundMessage::CustomModes(envelope) => print_modes(envelope.data()),
                InboundMessage::Error(envelope) => {
                    eprintln!("orchestrator error: {}", envelope.data().message)
                }
                InboundMessage::Tasks(envelope) => print_tasks(envelope.data()),
            },
            event = events.recv() => match event {
                Ok(SessionEvent::Closed(reason)) => bail!("connection closed ({reason:?})"),
                Ok(SessionEvent::Error(message)) => eprintln!("connection error: {message}"),
                Ok(SessionEvent::Opened) | Err(_) => {}
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
