use crate::config::StoreConfig;

use super::{open_existing_store, print_json};

pub fn run_status(config: &StoreConfig, json: bool) -> anyhow::Result<()> {
    let store = open_existing_store(config)?;
    let stats = store.stats()?;

    if json {
        return print_json(&stats);
    }

    println!();
    println!("Keel Store Status");
    println!("{}", "─".repeat(17));
    println!("Owned identities: {}", stats.owned_identities);
    println!("Contacts:         {}", stats.contacts);
    println!("Groups:           {} v1, {} v2", stats.groups_v1, stats.groups_v2);
    println!(
        "Discussions:      {} ({} locked)",
        stats.discussions, stats.locked_discussions
    );
    println!("Messages:         {}", stats.messages);
    println!("Fyles:            {}", stats.fyles);
    println!("Invitations:      {}", stats.invitations);
    println!();
    Ok(())
}
