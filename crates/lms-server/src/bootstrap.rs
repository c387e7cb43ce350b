use anyhow::Result;
use tracing::info;

use lms_api::auth::hash_password;
use lms_db::Database;

use crate::config::Bootstrap;

/// Create the configured library and its supervisor unless they already exist.
pub fn run(db: &Database, bootstrap: &Bootstrap) -> Result<()> {
    let library_id = match db.get_library_by_name(&bootstrap.library)? {
        Some(library) => library.id,
        None => {
            let id = db.create_library(&bootstrap.library)?;
            info!("Created library '{}' ({})", bootstrap.library, id);
            id
        }
    };

    if db.get_user_by_username(&bootstrap.supervisor)?.is_some() {
        return Ok(());
    }

    let password = hash_password(&bootstrap.password)?;
    let user_id = format!("SUP-{:04}", library_id);
    db.create_user(
        &user_id,
        library_id,
        &bootstrap.supervisor,
        &bootstrap.supervisor,
        "supervisor",
        &password,
    )?;
    info!("Created supervisor '{}' as {}", bootstrap.supervisor, user_id);
    Ok(())
}
