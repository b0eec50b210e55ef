//! Text rendering of a channel tree

use chorus_core::channel::ChannelRecord;
use chorus_core::ChannelId;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Render `channels` as an indented tree rooted at the channel without a parent.
///
/// `links` maps a channel to the channels it is linked to; linked names are
/// listed after the channel name.
pub fn render_tree(channels: &[ChannelRecord], links: &BTreeMap<ChannelId, Vec<ChannelId>>) -> String {
    let by_id: BTreeMap<ChannelId, &ChannelRecord> = channels.iter().map(|c| (c.id, c)).collect();
    let mut children: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
    for c in channels {
        if let Some(parent) = c.parent {
            children.entry(parent).or_default().push(c.id);
        }
    }

    let mut out = String::new();
    if let Some(root) = channels.iter().find(|c| c.parent.is_none()) {
        let _ = writeln!(out, "{}", label(root, &by_id, links));
        render_children(root.id, "", &by_id, &children, links, &mut out);
    }
    out
}

fn render_children(
    id: ChannelId,
    prefix: &str,
    by_id: &BTreeMap<ChannelId, &ChannelRecord>,
    children: &BTreeMap<ChannelId, Vec<ChannelId>>,
    links: &BTreeMap<ChannelId, Vec<ChannelId>>,
    out: &mut String,
) {
    let Some(kids) = children.get(&id) else {
        return;
    };

    for (i, child) in kids.iter().enumerate() {
        let Some(record) = by_id.get(child) else {
            continue;
        };
        let last = i + 1 == kids.len();
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };

        let _ = writeln!(out, "{}{}{}", prefix, branch, label(record, by_id, links));
        render_children(*child, &format!("{}{}", prefix, indent), by_id, children, links, out);
    }
}

fn label(
    record: &ChannelRecord,
    by_id: &BTreeMap<ChannelId, &ChannelRecord>,
    links: &BTreeMap<ChannelId, Vec<ChannelId>>,
) -> String {
    let linked: Vec<&str> = links
        .get(&record.id)
        .into_iter()
        .flatten()
        .filter_map(|l| by_id.get(l).map(|r| r.name.as_str()))
        .collect();

    if linked.is_empty() {
        format!("{} [{}]", record.name, record.id)
    } else {
        format!("{} [{}] <-> {}", record.name, record.id, linked.join(", "))
    }
}
