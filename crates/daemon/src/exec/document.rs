// Reading and rewriting codeblocks through the mirror.

use fencerun_common::codeblock::{parse_codeblocks, Codeblock};
use fencerun_common::types::DocumentHandle;

use crate::error::EngineError;
use crate::mirror::DocumentMirror;

/// Current lines of `doc` and the codeblocks parsed from them.
pub async fn current_blocks(
    mirror: &DocumentMirror,
    doc: DocumentHandle,
) -> Result<(Vec<String>, Vec<Codeblock>), EngineError> {
    let lines = mirror.read_lines(doc).await?;
    let blocks = parse_codeblocks(doc, &lines)?;
    Ok((lines, blocks))
}

/// Overwrite the lines of `current` with the rendering of `updated`.
pub async fn replace_block(
    mirror: &DocumentMirror,
    current: &Codeblock,
    updated: &Codeblock,
) -> Result<(), EngineError> {
    mirror
        .write_lines(current.document, current.start_line, current.end_line + 1, updated.render())
        .await?;
    Ok(())
}
