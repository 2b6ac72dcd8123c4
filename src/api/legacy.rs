/// Fixed single-plug routes kept for old clients
use crate::{auth::AuthUser, context::AppContext, error::OneLightResult};
use axum::{extract::State, routing::get, Router};

/// Build legacy routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/on", get(turn_on))
        .route("/off", get(turn_off))
        .route("/hs100_status", get(ping))
        .route("/hs100_state", get(state))
}

async fn turn_on(State(ctx): State<AppContext>, user: AuthUser) -> OneLightResult<&'static str> {
    ctx.legacy.turn_on(user.user_id).await?;
    Ok("Light turned on!")
}

async fn turn_off(State(ctx): State<AppContext>, user: AuthUser) -> OneLightResult<&'static str> {
    ctx.legacy.turn_off(user.user_id).await?;
    Ok("Light turned off!")
}

/// "200" when the plug answered, "400" when it did not
async fn ping(State(ctx): State<AppContext>, user: AuthUser) -> OneLightResult<&'static str> {
    let ping = ctx.legacy.ping(user.user_id).await?;
    Ok(ping.code())
}

async fn state(State(ctx): State<AppContext>, user: AuthUser) -> OneLightResult<String> {
    ctx.legacy.state_line(user.user_id).await
}
