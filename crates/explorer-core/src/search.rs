//! Case-insensitive hash search over a chain snapshot. Purely a view concern;
//! it never touches the build.

use crate::Block;

/// Which hash fields of a block contain the search term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Highlight {
    pub hash: bool,
    pub previous_hash: bool,
}

impl Highlight {
    pub fn any(&self) -> bool {
        self.hash || self.previous_hash
    }
}

fn is_blank(term: &str) -> bool {
    term.trim().is_empty()
}

pub fn highlight(block: &Block, term: &str) -> Highlight {
    if is_blank(term) || block.is_mining {
        return Highlight::default();
    }
    let needle = term.to_lowercase();
    Highlight {
        hash: block.hash.to_lowercase().contains(&needle),
        previous_hash: block.previous_hash.to_lowercase().contains(&needle),
    }
}

/// A blank term keeps every block, placeholders included. Otherwise only
/// finalized blocks whose `hash` or `previous_hash` contains the term.
pub fn filter_chain<'a>(blocks: &'a [Block], term: &str) -> Vec<&'a Block> {
    if is_blank(term) {
        return blocks.iter().collect();
    }
    blocks
        .iter()
        .filter(|block| highlight(block, term).any())
        .collect()
}
