//! Lua bodies of the atomic queue operations
//!
//! Each script runs as one atomic unit on the Redis server. Key layout is
//! described on `QueueKeys`; deadlines are unix seconds.

use ::redis::Script;

/// Append a record and wake blocked consumers
/// `KEYS[1]` -> source list
/// `ARGV[1]` -> encoded item
/// `ARGV[2]` -> notification channel
pub const ENQUEUE: &str = r#"
    redis.call('RPUSH', KEYS[1], ARGV[1])
    redis.call('PUBLISH', ARGV[2], 'push')
    return 1
"#;

/// Move the source head into processing
/// `KEYS[1]` -> source list
/// `KEYS[2]` -> processing zset (id -> deadline)
/// `KEYS[3]` -> processing records hash (id -> encoded item)
/// `KEYS[4]` -> delivery count hash (id -> count)
/// `KEYS[5]` -> error list
/// `ARGV[1]` -> deadline
/// Returns the encoded item, or nil on an empty source. A record without a
/// string id or a payload is moved to the error list and still returned.
pub const CLAIM: &str = r#"
    local record = redis.call('LPOP', KEYS[1])
    if not record then
      return false
    end
    local ok, item = pcall(cjson.decode, record)
    if not ok or type(item) ~= 'table' or type(item['id']) ~= 'string' or item['payload'] == nil then
      redis.call('RPUSH', KEYS[5], record)
      return record
    end
    local id = item['id']
    redis.call('ZADD', KEYS[2], ARGV[1], id)
    redis.call('HSET', KEYS[3], id, record)
    redis.call('HINCRBY', KEYS[4], id, 1)
    return record
"#;

/// Return expired claims to the source tail
/// `KEYS[1]` -> source list
/// `KEYS[2]` -> processing zset
/// `KEYS[3]` -> processing records hash
/// `KEYS[4]` -> delivery count hash
/// `KEYS[5]` -> error list
/// `ARGV[1]` -> now
/// `ARGV[2]` -> delivery limit (0 = unlimited)
/// `ARGV[3]` -> notification channel
/// Returns `{requeued, dead_lettered}`
pub const RECLAIM: &str = r#"
    local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
    local limit = tonumber(ARGV[2])
    local requeued = 0
    local dead = 0
    for _, id in ipairs(expired) do
      local record = redis.call('HGET', KEYS[3], id)
      redis.call('ZREM', KEYS[2], id)
      redis.call('HDEL', KEYS[3], id)
      if not record then
        redis.call('HDEL', KEYS[4], id)
      else
        local deliveries = tonumber(redis.call('HGET', KEYS[4], id) or '0')
        if limit > 0 and deliveries >= limit then
          redis.call('HDEL', KEYS[4], id)
          redis.call('RPUSH', KEYS[5], record)
          dead = dead + 1
        else
          redis.call('RPUSH', KEYS[1], record)
          requeued = requeued + 1
        end
      end
    end
    if requeued > 0 then
      redis.call('PUBLISH', ARGV[3], 'reclaim')
    end
    return {requeued, dead}
"#;

/// Remove a claim that still carries the expected deadline
/// `KEYS[1]` -> processing zset
/// `KEYS[2]` -> processing records hash
/// `KEYS[3]` -> delivery count hash
/// `ARGV[1]` -> item id
/// `ARGV[2]` -> deadline the claim was made with
pub const ACK: &str = r#"
    local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
    if not score or tonumber(score) ~= tonumber(ARGV[2]) then
      return 0
    end
    redis.call('ZREM', KEYS[1], ARGV[1])
    redis.call('HDEL', KEYS[2], ARGV[1])
    redis.call('HDEL', KEYS[3], ARGV[1])
    return 1
"#;

/// Move a claim that still carries the expected deadline to the error list
/// `KEYS[1]` -> processing zset
/// `KEYS[2]` -> processing records hash
/// `KEYS[3]` -> delivery count hash
/// `KEYS[4]` -> error list
/// `ARGV[1]` -> item id
/// `ARGV[2]` -> deadline the claim was made with
pub const FAIL: &str = r#"
    local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
    if not score or tonumber(score) ~= tonumber(ARGV[2]) then
      return 0
    end
    local record = redis.call('HGET', KEYS[2], ARGV[1])
    redis.call('ZREM', KEYS[1], ARGV[1])
    redis.call('HDEL', KEYS[2], ARGV[1])
    redis.call('HDEL', KEYS[3], ARGV[1])
    if record then
      redis.call('RPUSH', KEYS[4], record)
    end
    return 1
"#;

/// Compiled script handles, hashed once at construction
pub struct Scripts {
    pub enqueue: Script,
    pub claim: Script,
    pub reclaim: Script,
    pub ack: Script,
    pub fail: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE),
            claim: Script::new(CLAIM),
            reclaim: Script::new(RECLAIM),
            ack: Script::new(ACK),
            fail: Script::new(FAIL),
        }
    }

    pub fn all(&self) -> [&Script; 5] {
        [&self.enqueue, &self.claim, &self.reclaim, &self.ack, &self.fail]
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_hashes_are_distinct() {
        let scripts = Scripts::new();
        let mut hashes: Vec<&str> = scripts.all().iter().map(|s| s.get_hash()).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 5);
    }
}
