// RPC method name constants for the editor <-> engine protocol.

// ── Editor → engine requests ───────────────────────────────────────
pub const RPC_PING: &str = "rpc.ping";
pub const ENGINE_SHUTDOWN: &str = "engine.shutdown";
pub const ENGINE_CONFIGURE: &str = "engine.configure";
pub const CODEBLOCK_RUN: &str = "codeblock.run";
pub const CODEBLOCK_KILL: &str = "codeblock.kill";
pub const CODEBLOCK_LIST: &str = "codeblock.list";
pub const CODEBLOCK_RUNNING: &str = "codeblock.running";

// ── Editor → engine notifications ──────────────────────────────────
pub const BUFFER_LINES: &str = "buffer.lines";
pub const BUFFER_DETACH: &str = "buffer.detach";

// ── Engine → editor requests ───────────────────────────────────────
pub const EDITOR_CURRENT_DOCUMENT: &str = "editor.current_document";
pub const EDITOR_CURSOR: &str = "editor.cursor";
pub const EDITOR_GET_LINES: &str = "editor.get_lines";
pub const EDITOR_SET_LINES: &str = "editor.set_lines";
pub const EDITOR_SET_ANNOTATION: &str = "editor.set_annotation";
pub const EDITOR_ATTACH: &str = "editor.attach";

/// All requests the engine dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    RPC_PING,
    ENGINE_SHUTDOWN,
    ENGINE_CONFIGURE,
    CODEBLOCK_RUN,
    CODEBLOCK_KILL,
    CODEBLOCK_LIST,
    CODEBLOCK_RUNNING,
];

/// Notifications the engine consumes.
pub const HANDLED_NOTIFICATIONS: &[&str] = &[BUFFER_LINES, BUFFER_DETACH];

/// Requests the engine sends to the editor.
pub const EDITOR_METHODS: &[&str] = &[
    EDITOR_CURRENT_DOCUMENT,
    EDITOR_CURSOR,
    EDITOR_GET_LINES,
    EDITOR_SET_LINES,
    EDITOR_SET_ANNOTATION,
    EDITOR_ATTACH,
];
