use lazy_static::lazy_static;
use log::{log_enabled, trace, Level};
use regex::Regex;
use std::net::Ipv4Addr;

lazy_static! {
    /// A u32 rule block: its `dst` match line, then up to six lines later the
    /// action's cumulative `Sent <n> bytes` counter.
    static ref RULE_BLOCK: Regex = Regex::new(
        r"dst (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:/\d+)?[^\n]*\n(?:[^\n]*\n){0,6}?[^\n]*Sent (\d+) bytes"
    )
    .expect("rule block pattern is valid");
}

/// Extract `(destination address, sent bytes)` pairs from the output of
/// `tc -s -pretty filter show ingress dev <iface>`.
///
/// Blocks whose address or counter do not parse are skipped.
pub fn parse_filter_stats(output: &str) -> Vec<(Ipv4Addr, u64)> {
    let samples: Vec<(Ipv4Addr, u64)> = RULE_BLOCK
        .captures_iter(output)
        .filter_map(|caps| {
            let address = caps[1].parse::<Ipv4Addr>().ok()?;
            let bytes = caps[2].parse::<u64>().ok()?;
            Some((address, bytes))
        })
        .collect();

    if log_enabled!(Level::Trace) {
        trace!("Parsed {} counters from tc output: {:?}", samples.len(), samples);
    }

    samples
}
