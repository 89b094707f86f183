//! Sidebar menu highlighting.

use pn_dom::Menu;

/// Marks the entry whose href is the longest prefix of `path` as active.
///
/// Every group is collapsed first; the winner's group, if any, is expanded.
pub fn highlight_menu(menu: &mut Menu, path: &str) -> Option<usize> {
    for group in &mut menu.groups {
        group.expanded = false;
        group.active = false;
    }

    let mut best: Option<(usize, usize)> = None;
    for (index, entry) in menu.entries.iter_mut().enumerate() {
        entry.active = false;
        if entry.href.is_empty() || !path.starts_with(&entry.href) {
            continue;
        }
        if best.is_none_or(|(_, len)| entry.href.len() > len) {
            best = Some((index, entry.href.len()));
        }
    }

    let (winner, _) = best?;
    let entry = menu.entries.get_mut(winner)?;
    entry.active = true;
    if let Some(group) = entry.group.and_then(|group| menu.groups.get_mut(group)) {
        group.expanded = true;
        group.active = true;
    }
    Some(winner)
}
