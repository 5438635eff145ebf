//! Conditional Lua scripts shared by the distributed primitives.
//!
//! Both scripts compare the value at `KEYS[1]` with `ARGV[1]` and only mutate
//! the key on a match, so the check and the mutation run as one server-side
//! step.

/// Delete `KEYS[1]` if its value equals `ARGV[1]`. Returns 1 on delete, else 0.
pub const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Reset the expiry of `KEYS[1]` to `ARGV[2]` seconds if its value equals
/// `ARGV[1]`. Returns 1 on success, else 0.
pub const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("expire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// SHA1 handle Redis assigns to `script` on `SCRIPT LOAD`.
pub fn script_hash(script: &str) -> String {
    redis::Script::new(script).get_hash().to_string()
}
