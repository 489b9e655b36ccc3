// JSON-RPC host: method dispatch and the stdio transport shared with the editor.

pub mod methods;
pub mod peer;
pub mod stdio;
