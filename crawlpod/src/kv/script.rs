//! Scripted atomic pop-and-check for `domains:queue`, used by the frontier
//! manager to avoid a pop / hget / conditional-repush round trip per
//! candidate domain (spec §5: "using a scripted atomic pop-and-check for
//! the ready-queue when possible").

use once_cell::sync::Lazy;
use redis::Script;

use super::Pod;
use crate::error::Result;

const POP_READY_DOMAIN_SCRIPT: &str = r#"
local queue_key = KEYS[1]
local now = tonumber(ARGV[1])
local max_attempts = tonumber(ARGV[2])

for _ = 1, max_attempts do
    local domain = redis.call('LPOP', queue_key)
    if not domain then
        return nil
    end

    local record_key = 'domain:' .. domain
    local excluded = redis.call('HGET', record_key, 'is_excluded')
    local next_fetch_time = redis.call('HGET', record_key, 'next_fetch_time')

    if excluded == '1' then
        -- dropped: an excluded domain is never re-enqueued.
    elseif next_fetch_time and tonumber(next_fetch_time) > now then
        redis.call('RPUSH', queue_key, domain)
    else
        return domain
    end
end

return nil
"#;

static SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(POP_READY_DOMAIN_SCRIPT));

/// Pops domains from `queue_key` until it finds one that is not excluded
/// and whose `next_fetch_time` has passed, re-pushing ineligible domains to
/// the tail as it goes. Returns `None` if no eligible domain is found
/// within `max_attempts` pops (including the queue going empty).
pub async fn atomic_pop_ready_domain(
    pod: &Pod,
    queue_key: &str,
    now: i64,
    max_attempts: usize,
) -> Result<Option<String>> {
    let mut conn = pod.raw();
    let domain: Option<String> = SCRIPT
        .key(queue_key)
        .arg(now)
        .arg(max_attempts as i64)
        .invoke_async(&mut conn)
        .await?;
    Ok(domain)
}
