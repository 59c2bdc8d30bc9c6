use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    with_database("migrate", |_pool| async { Ok("applied pending migrations".to_string()) })
}
