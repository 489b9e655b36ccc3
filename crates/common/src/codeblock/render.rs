use std::cmp::Ordering;

use super::{Codeblock, FENCE, OPT_ID, OPT_SOURCE};

fn option_rank(key: &str) -> u8 {
    match key {
        OPT_ID => 0,
        OPT_SOURCE => 1,
        _ => 2,
    }
}

/// Identity keys first, everything else alphabetically.
fn option_order(a: &str, b: &str) -> Ordering {
    option_rank(a).cmp(&option_rank(b)).then_with(|| a.cmp(b))
}

impl Codeblock {
    /// The fence line for this block's language and options.
    pub fn render_header(&self) -> String {
        let mut keys: Vec<&String> = self.opts.keys().collect();
        keys.sort_by(|a, b| option_order(a, b));

        let mut header = format!("{FENCE}{}", self.language);
        for key in keys {
            header.push(' ');
            header.push_str(key);
            header.push('=');
            header.push_str(&self.opts[key]);
        }
        header
    }

    /// Serialize back to document lines, fences included.
    ///
    /// A single trailing line break in `text` does not produce an extra empty line.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![self.render_header()];
        let mut body: Vec<&str> = self.text.split('\n').collect();
        if body.last() == Some(&"") {
            body.pop();
        }
        lines.extend(body.into_iter().map(str::to_string));
        lines.push(FENCE.to_string());
        lines
    }
}
