//! Step transitions of the node lifecycle.

use crate::model::{DatabaseAction, NodeAction};

/// Action that follows a successfully completed `action`.
pub fn advance(
    action: NodeAction,
    database_action: Option<DatabaseAction>,
    is_archive: bool,
) -> NodeAction {
    match action {
        NodeAction::Download if is_archive => NodeAction::Unzip,
        NodeAction::Download | NodeAction::Unzip => NodeAction::Import,
        NodeAction::Import => match database_action {
            Some(DatabaseAction::Buffer) => NodeAction::Buffer,
            Some(DatabaseAction::Grid) => NodeAction::Run,
            _ => NodeAction::Processed,
        },
        NodeAction::Concatenate
        | NodeAction::Buffer
        | NodeAction::Run
        | NodeAction::Amalgamate
        | NodeAction::Unprocessed => NodeAction::Processed,
        terminal => terminal,
    }
}
