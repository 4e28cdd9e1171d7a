//! Demo service echoing its parameters back as an entity.
//!
//! Run with `KATANA_COMPONENT_NAME=echo KATANA_COMPONENT_VERSION=1.0.0`.

use std::process::ExitCode;

use katana::{Action, HandlerResult, Service};
use katana_payload::Map;

fn echo(action: &mut Action) -> HandlerResult {
    let mut entity = Map::new();
    for param in action.params() {
        entity.insert(param.name().to_owned(), param.value()?);
    }
    action.set_entity(entity)?;
    Ok(())
}

fn main() -> ExitCode {
    match Service::new().action("echo", echo).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("katana: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
