//! Parsers for the text emitted by the system tools we probe with.

use std::net::IpAddr;

/// Addresses that say nothing about which network we are on.
const LOOPBACK: &[&str] = &["127.0.0.1", "::1"];

/// Extract the SSID of the active connection from `nmcli -t -f active,ssid dev wifi`.
///
/// Terse mode escapes `:` and `\` inside values, so both are unescaped here.
pub fn active_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("yes:"))
        .find(|ssid| !ssid.is_empty())
        .map(unescape_terse)
}

fn unescape_terse(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Collect every non-loopback address from `ip addr show`, in output order.
pub fn local_addresses(output: &str) -> Vec<String> {
    let mut addrs: Vec<String> = Vec::new();
    for line in output.lines() {
        let line = line.trim_start();
        let rest = match line
            .strip_prefix("inet6 ")
            .or_else(|| line.strip_prefix("inet "))
        {
            Some(rest) => rest.trim_start(),
            None => continue,
        };
        let addr = rest
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        if addr.parse::<IpAddr>().is_err() || LOOPBACK.contains(&addr) {
            continue;
        }
        if !addrs.iter().any(|a| a == addr) {
            addrs.push(addr.to_string());
        }
    }
    addrs
}

/// First token of a "what is my IP" response body, if it is an address.
pub fn global_address(body: &str) -> Option<String> {
    let token = body.split_whitespace().next()?;
    token.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}
