use tracing::info;

use crate::app::AppContext;

use super::print_session;

pub fn handle_unlock(ctx: &AppContext) -> anyhow::Result<()> {
    ctx.require_vault()?;
    let keys = ctx.key_manager();
    let master_key = ctx.unlock_with_passphrase(&keys)?;

    let sessions = ctx.sessions();
    let token = sessions.create_session(master_key.as_bytes())?;
    info!("session started");

    print_session(ctx.quiet(), &token, sessions.expires_at()?);
    Ok(())
}
