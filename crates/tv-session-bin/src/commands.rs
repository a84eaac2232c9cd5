//! Subcommand handlers.

use std::sync::Arc;

use http_gateway::{media_links, DeviceRegistration};
use push_channel::{PushChannel, PushConfig};
use serde_json::json;
use session_lifecycle::{DeviceDescriptor, Session, TvPairingRequest};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::App;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub async fn login(app: &App, email: &str, password: &str, register: bool) -> CmdResult {
    let session = app.sessions.sign_in_with_password(email, password).await?;
    print_signed_in(&session);
    if register {
        register_device(app).await;
    }
    Ok(())
}

pub async fn pair(app: &App, code: &str, register: bool) -> CmdResult {
    let request = TvPairingRequest {
        device: device_descriptor(app),
        code_verifier: code.to_string(),
    };
    let session = app.sessions.sign_in_with_tv_code(&request).await?;
    print_signed_in(&session);
    if register {
        register_device(app).await;
    }
    Ok(())
}

pub fn logout(app: &App) -> CmdResult {
    if !app.sessions.is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }
    app.sessions.force_logout(false);
    println!("Logged out");
    Ok(())
}

pub fn status(app: &App) -> CmdResult {
    let state = app.sessions.session_state();
    let session = app.sessions.current_session()?;
    let status = json!({
        "device_id": app.device_id,
        "device_name": app.config.device_name,
        "authenticated": state.authenticated,
        "epoch": state.epoch,
        "token_state": format!("{:?}", app.sessions.machine_state()),
        "expires_at": session.as_ref().and_then(|s| s.tokens.expires_at),
        "has_refresh_token": session.as_ref().is_some_and(|s| s.tokens.refresh_token.is_some()),
        "renewal_armed": app.sessions.is_renewal_armed(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Follow the push channel until Ctrl-C.
pub async fn watch(app: &App) -> CmdResult {
    if !app.sessions.is_authenticated() {
        return Err("Not logged in; run `pixlme-tv login` or `pixlme-tv pair` first".into());
    }

    let mut config = PushConfig::new(app.device_id.clone());
    config.renewal_interval = app.config.push_renewal_interval();

    let channel = PushChannel::new(
        config,
        app.api.clone(),
        app.api.clone(),
        app.sessions.subscribe_state(),
    );
    let mut events = channel.subscribe();
    let mut notices = app.sessions.subscribe_notices();
    channel.start();
    info!(channel = %app.device_id, "Watching push updates");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result: CmdResult = loop {
        tokio::select! {
            signal = &mut ctrl_c => break signal.map_err(Into::into),
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to encode push event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped push events"),
                Err(RecvError::Closed) => break Ok(()),
            },
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    println!("{}", json!({ "event": "notice", "title": notice.title, "detail": notice.detail }));
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    channel.shutdown();
    result
}

/// One line per collection: id, then name when the backend has one.
pub async fn collections(app: &App) -> CmdResult {
    for summary in app.api.fetch_user_collections().await? {
        match summary.name {
            Some(name) => println!("{}\t{name}", summary.collection_id),
            None => println!("{}", summary.collection_id),
        }
    }
    Ok(())
}

pub async fn collection(app: &App, id: &str, page: u32, limit: u32) -> CmdResult {
    let items = app.api.fetch_collection(id, page, limit).await?;
    for link in media_links(&items) {
        println!("{link}");
    }
    Ok(())
}

fn device_descriptor(app: &App) -> DeviceDescriptor {
    DeviceDescriptor::tv(app.device_id.clone(), app.config.device_name.clone())
}

/// Registration failures do not undo the sign-in.
async fn register_device(app: &App) {
    let registration = DeviceRegistration::new(device_descriptor(app));
    if let Err(e) = app.api.register_device(&registration).await {
        warn!(error = %e, "Device registration failed");
    }
}

fn print_signed_in(session: &Session) {
    match session.tokens.expires_at {
        Some(expires_at) => println!("Signed in (token expires {expires_at})"),
        None => println!("Signed in"),
    }
}
