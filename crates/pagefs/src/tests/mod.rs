mod exclusion;

use std::path::Path;

use crate::{PageFs, PageLayout};

pub(crate) const BACKING: [&str; 5] = ["1.vfs", "2.vfs", "3.vfs", "4.vfs", "5.vfs"];

pub(crate) async fn mount(root: &Path) -> PageFs {
    PageFs::new(BACKING, root).await.unwrap()
}

/// Sum of the host sizes of every backing file under `root`.
pub(crate) fn host_bytes(root: &Path) -> u64 {
    BACKING
        .iter()
        .map(|name| std::fs::metadata(root.join(name)).map(|m| m.len()).unwrap_or(0))
        .sum()
}

/// Next-page link of `page` read from a raw backing file image.
pub(crate) fn raw_link(raw: &[u8], layout: PageLayout, page: u64) -> u64 {
    crate::record::read_word(raw, layout.link_offset(page) as usize)
}

/// Non-trivial test payload of the given size.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
