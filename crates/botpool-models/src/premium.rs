/// How many secondary bot identities a batch at each premium tier may try
/// per user. Unknown tiers get no secondary bots.
pub fn secondary_bot_limit(tier: u8) -> usize {
    match tier {
        0 | 1 => 0,
        2 => 1,
        3 => 3,
        4 => 10,
        5 => 100,
        _ => 0,
    }
}
