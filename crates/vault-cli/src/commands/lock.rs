use crate::app::AppContext;

pub fn handle_lock(ctx: &AppContext) -> anyhow::Result<()> {
    ctx.require_vault()?;
    let sessions = ctx.sessions();
    let active = sessions.path().exists();
    sessions.clear_session()?;
    if !ctx.quiet() {
        if active {
            println!("Vault locked. Session cleared.");
        } else {
            println!("No active session found.");
        }
    }
    Ok(())
}
