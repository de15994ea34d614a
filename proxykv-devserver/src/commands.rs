//! # Command Dispatch
//!
//! Purpose: Execute one parsed command against the keyspace and build its
//! reply, following the store's documented reply shapes.
//!
//! Unsupported commands answer `-ERR unknown command`; commands against a key
//! of another type answer `-WRONGTYPE`.

use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use hashbrown::{HashMap, HashSet};

use crate::db::{Db, KeyTtl, Value};
use crate::protocol::Reply;

type Args<'a> = &'a [Vec<u8>];

/// Executes `args` (command name first) against `db`.
pub fn execute(db: &mut Db, args: Args<'_>) -> Reply {
    let Some(name) = args.first() else {
        return Reply::err("empty command");
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    let result = match name.as_str() {
        "PING" => ping(args),
        "GET" => get(db, args),
        "SET" => set(db, args),
        "SETEX" => setex(db, args),
        "SETNX" => setnx(db, args),
        "GETSET" => getset(db, args),
        "DEL" => del(db, args),
        "EXISTS" => exists(db, args),
        "EXPIRE" => expire(db, args),
        "EXPIREAT" => expireat(db, args),
        "TTL" => ttl(db, args),
        "INCR" => incr_by(db, args, 2, |_| Ok(1)),
        "DECR" => incr_by(db, args, 2, |_| Ok(-1)),
        "INCRBY" => incr_by(db, args, 3, |args| parse_i64(&args[2])),
        "DECRBY" => incr_by(db, args, 3, |args| parse_i64(&args[2]).map(|n| -n)),
        "APPEND" => append(db, args),
        "STRLEN" => strlen(db, args),
        "GETRANGE" | "SUBSTR" => getrange(db, args),
        "TYPE" => type_of(db, args),
        "MGET" => mget(db, args),
        "MSET" => mset(db, args),
        "HSET" | "HMSET" => hset(db, args, &name),
        "HSETNX" => hsetnx(db, args),
        "HGET" => hget(db, args),
        "HMGET" => hmget(db, args),
        "HDEL" => hdel(db, args),
        "HEXISTS" => hexists(db, args),
        "HGETALL" => hgetall(db, args),
        "HKEYS" => hkeys(db, args),
        "HVALS" => hvals(db, args),
        "HLEN" => hlen(db, args),
        "HINCRBY" => hincrby(db, args),
        "LPUSH" => push(db, args, true),
        "RPUSH" => push(db, args, false),
        "LPOP" => pop(db, args, true),
        "RPOP" => pop(db, args, false),
        "LLEN" => llen(db, args),
        "LRANGE" => lrange(db, args),
        "LINDEX" => lindex(db, args),
        "SADD" => sadd(db, args),
        "SREM" => srem(db, args),
        "SMEMBERS" => smembers(db, args),
        "SISMEMBER" => sismember(db, args),
        "SCARD" => scard(db, args),
        "ZADD" => zadd(db, args),
        "ZINCRBY" => zincrby(db, args),
        "ZSCORE" => zscore(db, args),
        "ZCARD" => zcard(db, args),
        "ZCOUNT" => zcount(db, args),
        "ZRANGE" => zrange(db, args, false),
        "ZREVRANGE" => zrange(db, args, true),
        "ZRANGEBYSCORE" => zrange_by_score(db, args, false),
        "ZREVRANGEBYSCORE" => zrange_by_score(db, args, true),
        "ZRANK" => zrank(db, args, false),
        "ZREVRANK" => zrank(db, args, true),
        "ZREM" => zrem(db, args),
        _ => Err(Reply::err(format!("unknown command '{name}'"))),
    };
    result.unwrap_or_else(|reply| reply)
}

// Handlers return `Err(reply)` for early error replies so `?` can be used.
type HandlerResult = Result<Reply, Reply>;

fn arity(args: Args<'_>, min: usize, exact: bool) -> Result<(), Reply> {
    let ok = if exact { args.len() == min } else { args.len() >= min };
    if ok {
        Ok(())
    } else {
        Err(Reply::err(format!(
            "wrong number of arguments for '{}' command",
            String::from_utf8_lossy(&args[0]).to_ascii_lowercase()
        )))
    }
}

fn parse_i64(arg: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Reply::err("value is not an integer or out of range"))
}

fn parse_f64(arg: &[u8]) -> Result<f64, Reply> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|value| !value.is_nan())
        .ok_or_else(|| Reply::err("value is not a valid float"))
}

fn string_of(value: Option<&Value>) -> Result<Option<&Vec<u8>>, Reply> {
    match value {
        None => Ok(None),
        Some(Value::Str(data)) => Ok(Some(data)),
        Some(_) => Err(Reply::wrong_type()),
    }
}

fn ping(args: Args<'_>) -> HandlerResult {
    match args.len() {
        1 => Ok(Reply::Simple("PONG")),
        2 => Ok(Reply::Bulk(args[1].clone())),
        _ => Err(Reply::err("wrong number of arguments for 'ping' command")),
    }
}

fn get(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    Ok(Reply::bulk_opt(string_of(db.get(&args[1]))?.cloned()))
}

fn set(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let mut ttl = None;
    let mut nx = false;
    let mut idx = 3;
    while idx < args.len() {
        let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "NX" => nx = true,
            "EX" | "PX" if idx + 1 < args.len() => {
                let amount = parse_i64(&args[idx + 1])?;
                if amount <= 0 {
                    return Err(Reply::err("invalid expire time in 'set' command"));
                }
                let amount = amount as u64;
                ttl = Some(if option == "EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
                idx += 1;
            }
            _ => return Err(Reply::err("syntax error")),
        }
        idx += 1;
    }

    if nx && db.contains(&args[1]) {
        return Ok(Reply::Null);
    }
    db.insert(args[1].clone(), Value::Str(args[2].clone()));
    if let Some(ttl) = ttl {
        db.expire_at(&args[1], Instant::now() + ttl);
    }
    Ok(Reply::ok())
}

fn setex(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let seconds = parse_i64(&args[2])?;
    if seconds <= 0 {
        return Err(Reply::err("invalid expire time in 'setex' command"));
    }
    db.insert(args[1].clone(), Value::Str(args[3].clone()));
    db.expire_at(&args[1], Instant::now() + Duration::from_secs(seconds as u64));
    Ok(Reply::ok())
}

fn setnx(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    if db.contains(&args[1]) {
        return Ok(Reply::Integer(0));
    }
    db.insert(args[1].clone(), Value::Str(args[2].clone()));
    Ok(Reply::Integer(1))
}

fn getset(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let old = string_of(db.get(&args[1]))?.cloned();
    db.insert(args[1].clone(), Value::Str(args[2].clone()));
    Ok(Reply::bulk_opt(old))
}

fn del(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, false)?;
    let removed = args[1..].iter().filter(|key| db.remove(key)).count();
    Ok(Reply::Integer(removed as i64))
}

fn exists(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, false)?;
    let found = args[1..].iter().filter(|key| db.contains(key)).count();
    Ok(Reply::Integer(found as i64))
}

fn expire(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let seconds = parse_i64(&args[2])?;
    if seconds <= 0 {
        return Ok(Reply::Integer(i64::from(db.remove(&args[1]))));
    }
    let at = Instant::now() + Duration::from_secs(seconds as u64);
    Ok(Reply::Integer(i64::from(db.expire_at(&args[1], at))))
}

fn expireat(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let unix = parse_i64(&args[2])?;
    let now_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    if unix <= now_unix {
        return Ok(Reply::Integer(i64::from(db.remove(&args[1]))));
    }
    let at = Instant::now() + Duration::from_secs((unix - now_unix) as u64);
    Ok(Reply::Integer(i64::from(db.expire_at(&args[1], at))))
}

fn ttl(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let value = match db.ttl(&args[1]) {
        KeyTtl::Missing => -2,
        KeyTtl::NoExpiry => -1,
        // Round up so a fresh `EXPIRE k 10` reports 10.
        KeyTtl::ExpiresIn(left) => (left.as_millis() as i64 + 999) / 1000,
    };
    Ok(Reply::Integer(value))
}

fn incr_by<F>(db: &mut Db, args: Args<'_>, expected: usize, delta: F) -> HandlerResult
where
    F: FnOnce(Args<'_>) -> Result<i64, Reply>,
{
    arity(args, expected, true)?;
    let delta = delta(args)?;
    let current = match string_of(db.get(&args[1]))? {
        Some(data) => parse_i64(data)?,
        None => 0,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| Reply::err("increment or decrement would overflow"))?;
    db.replace(&args[1], Value::Str(next.to_string().into_bytes()));
    Ok(Reply::Integer(next))
}

fn append(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let mut data = string_of(db.get(&args[1]))?.cloned().unwrap_or_default();
    data.extend_from_slice(&args[2]);
    let len = data.len();
    db.replace(&args[1], Value::Str(data));
    Ok(Reply::Integer(len as i64))
}

fn strlen(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let len = string_of(db.get(&args[1]))?.map_or(0, Vec::len);
    Ok(Reply::Integer(len as i64))
}

/// Resolves an inclusive `[start, stop]` range with negative indexes over
/// `len` items; `None` when empty.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn getrange(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let data = string_of(db.get(&args[1]))?.cloned().unwrap_or_default();
    let slice = resolve_range(start, stop, data.len())
        .map(|(from, to)| data[from..=to].to_vec())
        .unwrap_or_default();
    Ok(Reply::Bulk(slice))
}

fn type_of(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    Ok(Reply::Simple(db.get(&args[1]).map_or("none", Value::type_name)))
}

fn mget(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, false)?;
    let values = args[1..]
        .iter()
        .map(|key| match db.get(key) {
            Some(Value::Str(data)) => Reply::Bulk(data.clone()),
            _ => Reply::Null,
        })
        .collect();
    Ok(Reply::Array(values))
}

fn mset(db: &mut Db, args: Args<'_>) -> HandlerResult {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(Reply::err("wrong number of arguments for 'mset' command"));
    }
    for pair in args[1..].chunks(2) {
        db.insert(pair[0].clone(), Value::Str(pair[1].clone()));
    }
    Ok(Reply::ok())
}

fn hash_of(value: Option<&Value>) -> Result<Option<&HashMap<Vec<u8>, Vec<u8>>>, Reply> {
    match value {
        None => Ok(None),
        Some(Value::Hash(map)) => Ok(Some(map)),
        Some(_) => Err(Reply::wrong_type()),
    }
}

fn hash_mut<'a>(db: &'a mut Db, key: &[u8]) -> Result<&'a mut HashMap<Vec<u8>, Vec<u8>>, Reply> {
    match db.get_or_insert_with(key, || Value::Hash(HashMap::new())) {
        Value::Hash(map) => Ok(map),
        _ => Err(Reply::wrong_type()),
    }
}

fn hset(db: &mut Db, args: Args<'_>, name: &str) -> HandlerResult {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(Reply::err(format!(
            "wrong number of arguments for '{}' command",
            name.to_ascii_lowercase()
        )));
    }
    let map = hash_mut(db, &args[1])?;
    let mut added = 0;
    for pair in args[2..].chunks(2) {
        if map.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    if name == "HMSET" {
        Ok(Reply::ok())
    } else {
        Ok(Reply::Integer(added))
    }
}

fn hsetnx(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let map = hash_mut(db, &args[1])?;
    if map.contains_key(&args[2]) {
        return Ok(Reply::Integer(0));
    }
    map.insert(args[2].clone(), args[3].clone());
    Ok(Reply::Integer(1))
}

fn hget(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let value = hash_of(db.get(&args[1]))?.and_then(|map| map.get(&args[2]).cloned());
    Ok(Reply::bulk_opt(value))
}

fn hmget(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let map = hash_of(db.get(&args[1]))?;
    let values = args[2..]
        .iter()
        .map(|field| Reply::bulk_opt(map.and_then(|map| map.get(field).cloned())))
        .collect();
    Ok(Reply::Array(values))
}

fn hdel(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let removed = match db.get_mut(&args[1]) {
        None => 0,
        Some(Value::Hash(map)) => args[2..].iter().filter(|field| map.remove(*field).is_some()).count(),
        Some(_) => return Err(Reply::wrong_type()),
    };
    db.remove_if_empty(&args[1]);
    Ok(Reply::Integer(removed as i64))
}

fn hexists(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let found = hash_of(db.get(&args[1]))?.map_or(false, |map| map.contains_key(&args[2]));
    Ok(Reply::Integer(i64::from(found)))
}

fn hgetall(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let mut items = Vec::new();
    if let Some(map) = hash_of(db.get(&args[1]))? {
        for (field, value) in map {
            items.push(Reply::Bulk(field.clone()));
            items.push(Reply::Bulk(value.clone()));
        }
    }
    Ok(Reply::Array(items))
}

fn hkeys(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let keys = hash_of(db.get(&args[1]))?.map(|map| map.keys().cloned().collect::<Vec<_>>());
    Ok(Reply::array(keys.unwrap_or_default()))
}

fn hvals(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let values = hash_of(db.get(&args[1]))?.map(|map| map.values().cloned().collect::<Vec<_>>());
    Ok(Reply::array(values.unwrap_or_default()))
}

fn hlen(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let len = hash_of(db.get(&args[1]))?.map_or(0, |map| map.len());
    Ok(Reply::Integer(len as i64))
}

fn hincrby(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let delta = parse_i64(&args[3])?;
    let map = hash_mut(db, &args[1])?;
    let current = match map.get(&args[2]) {
        Some(data) => parse_i64(data).map_err(|_| Reply::err("hash value is not an integer"))?,
        None => 0,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| Reply::err("increment or decrement would overflow"))?;
    map.insert(args[2].clone(), next.to_string().into_bytes());
    Ok(Reply::Integer(next))
}

fn list_of(value: Option<&Value>) -> Result<Option<&VecDeque<Vec<u8>>>, Reply> {
    match value {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(Reply::wrong_type()),
    }
}

fn push(db: &mut Db, args: Args<'_>, front: bool) -> HandlerResult {
    arity(args, 3, false)?;
    let list = match db.get_or_insert_with(&args[1], || Value::List(VecDeque::new())) {
        Value::List(list) => list,
        _ => return Err(Reply::wrong_type()),
    };
    for value in &args[2..] {
        if front {
            list.push_front(value.clone());
        } else {
            list.push_back(value.clone());
        }
    }
    Ok(Reply::Integer(list.len() as i64))
}

fn pop(db: &mut Db, args: Args<'_>, front: bool) -> HandlerResult {
    arity(args, 2, true)?;
    let value = match db.get_mut(&args[1]) {
        None => None,
        Some(Value::List(list)) => {
            if front {
                list.pop_front()
            } else {
                list.pop_back()
            }
        }
        Some(_) => return Err(Reply::wrong_type()),
    };
    db.remove_if_empty(&args[1]);
    Ok(Reply::bulk_opt(value))
}

fn llen(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let len = list_of(db.get(&args[1]))?.map_or(0, VecDeque::len);
    Ok(Reply::Integer(len as i64))
}

fn lrange(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let items = match list_of(db.get(&args[1]))? {
        Some(list) => match resolve_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        },
        None => Vec::new(),
    };
    Ok(Reply::array(items))
}

fn lindex(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let index = parse_i64(&args[2])?;
    let value = list_of(db.get(&args[1]))?.and_then(|list| {
        let idx = if index < 0 { list.len() as i64 + index } else { index };
        usize::try_from(idx).ok().and_then(|idx| list.get(idx).cloned())
    });
    Ok(Reply::bulk_opt(value))
}

fn set_of(value: Option<&Value>) -> Result<Option<&HashSet<Vec<u8>>>, Reply> {
    match value {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(Reply::wrong_type()),
    }
}

fn sadd(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let set = match db.get_or_insert_with(&args[1], || Value::Set(HashSet::new())) {
        Value::Set(set) => set,
        _ => return Err(Reply::wrong_type()),
    };
    let added = args[2..].iter().filter(|member| set.insert((*member).clone())).count();
    Ok(Reply::Integer(added as i64))
}

fn srem(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let removed = match db.get_mut(&args[1]) {
        None => 0,
        Some(Value::Set(set)) => args[2..].iter().filter(|member| set.remove(*member)).count(),
        Some(_) => return Err(Reply::wrong_type()),
    };
    db.remove_if_empty(&args[1]);
    Ok(Reply::Integer(removed as i64))
}

fn smembers(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let members = set_of(db.get(&args[1]))?.map(|set| set.iter().cloned().collect::<Vec<_>>());
    Ok(Reply::array(members.unwrap_or_default()))
}

fn sismember(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let found = set_of(db.get(&args[1]))?.map_or(false, |set| set.contains(&args[2]));
    Ok(Reply::Integer(i64::from(found)))
}

fn scard(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let len = set_of(db.get(&args[1]))?.map_or(0, |set| set.len());
    Ok(Reply::Integer(len as i64))
}

fn zset_of(value: Option<&Value>) -> Result<Option<&HashMap<Vec<u8>, f64>>, Reply> {
    match value {
        None => Ok(None),
        Some(Value::ZSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(Reply::wrong_type()),
    }
}

fn zset_mut<'a>(db: &'a mut Db, key: &[u8]) -> Result<&'a mut HashMap<Vec<u8>, f64>, Reply> {
    match db.get_or_insert_with(key, || Value::ZSet(HashMap::new())) {
        Value::ZSet(zset) => Ok(zset),
        _ => Err(Reply::wrong_type()),
    }
}

/// Members ordered by (score, member), reversed when `rev`.
fn ordered(zset: &HashMap<Vec<u8>, f64>, rev: bool) -> Vec<(Vec<u8>, f64)> {
    let mut items: Vec<_> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    if rev {
        items.reverse();
    }
    items
}

fn scored_reply(items: Vec<(Vec<u8>, f64)>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Reply::Bulk(member));
        if with_scores {
            out.push(Reply::score(score));
        }
    }
    Reply::Array(out)
}

#[derive(Clone, Copy)]
struct Bound {
    value: f64,
    exclusive: bool,
}

impl Bound {
    fn parse(arg: &[u8]) -> Result<Self, Reply> {
        let (exclusive, raw) = match arg.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, arg),
        };
        let value = parse_f64(raw).map_err(|_| Reply::err("min or max is not a float"))?;
        Ok(Bound { value, exclusive })
    }

    fn below(self, score: f64) -> bool {
        if self.exclusive {
            self.value < score
        } else {
            self.value <= score
        }
    }

    fn above(self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

fn zadd(db: &mut Db, args: Args<'_>) -> HandlerResult {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(Reply::err("wrong number of arguments for 'zadd' command"));
    }
    let pairs = args[2..]
        .chunks(2)
        .map(|pair| -> Result<(f64, Vec<u8>), Reply> { Ok((parse_f64(&pair[0])?, pair[1].clone())) })
        .collect::<Result<Vec<_>, Reply>>()?;
    let zset = zset_mut(db, &args[1])?;
    let added = pairs
        .into_iter()
        .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
        .count();
    Ok(Reply::Integer(added as i64))
}

fn zincrby(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let delta = parse_f64(&args[2])?;
    let zset = zset_mut(db, &args[1])?;
    let score = zset.entry(args[3].clone()).or_insert(0.0);
    *score += delta;
    Ok(Reply::score(*score))
}

fn zscore(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, true)?;
    let score = zset_of(db.get(&args[1]))?.and_then(|zset| zset.get(&args[2]).copied());
    Ok(score.map_or(Reply::Null, Reply::score))
}

fn zcard(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 2, true)?;
    let len = zset_of(db.get(&args[1]))?.map_or(0, |zset| zset.len());
    Ok(Reply::Integer(len as i64))
}

fn zcount(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 4, true)?;
    let min = Bound::parse(&args[2])?;
    let max = Bound::parse(&args[3])?;
    let count = zset_of(db.get(&args[1]))?.map_or(0, |zset| {
        zset.values().filter(|score| min.below(**score) && max.above(**score)).count()
    });
    Ok(Reply::Integer(count as i64))
}

fn zrange(db: &mut Db, args: Args<'_>, rev: bool) -> HandlerResult {
    arity(args, 4, false)?;
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let with_scores = match args.get(4) {
        None => false,
        Some(opt) if opt.eq_ignore_ascii_case(b"WITHSCORES") && args.len() == 5 => true,
        Some(_) => return Err(Reply::err("syntax error")),
    };
    let items = match zset_of(db.get(&args[1]))? {
        Some(zset) => {
            let items = ordered(zset, rev);
            match resolve_range(start, stop, items.len()) {
                Some((from, to)) => items[from..=to].to_vec(),
                None => Vec::new(),
            }
        }
        None => Vec::new(),
    };
    Ok(scored_reply(items, with_scores))
}

fn zrange_by_score(db: &mut Db, args: Args<'_>, rev: bool) -> HandlerResult {
    arity(args, 4, false)?;
    // Reverse queries list the upper bound first.
    let (min, max) = if rev {
        (Bound::parse(&args[3])?, Bound::parse(&args[2])?)
    } else {
        (Bound::parse(&args[2])?, Bound::parse(&args[3])?)
    };

    let mut with_scores = false;
    let mut limit: Option<(i64, i64)> = None;
    let mut idx = 4;
    while idx < args.len() {
        if args[idx].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            idx += 1;
        } else if args[idx].eq_ignore_ascii_case(b"LIMIT") && idx + 2 < args.len() {
            limit = Some((parse_i64(&args[idx + 1])?, parse_i64(&args[idx + 2])?));
            idx += 3;
        } else {
            return Err(Reply::err("syntax error"));
        }
    }

    let mut items: Vec<_> = match zset_of(db.get(&args[1]))? {
        Some(zset) => ordered(zset, rev)
            .into_iter()
            .filter(|(_, score)| min.below(*score) && max.above(*score))
            .collect(),
        None => Vec::new(),
    };
    if let Some((offset, count)) = limit {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        items = items.into_iter().skip(offset).take(count).collect();
    }
    Ok(scored_reply(items, with_scores))
}

fn zrank(db: &mut Db, args: Args<'_>, rev: bool) -> HandlerResult {
    arity(args, 3, true)?;
    let rank = zset_of(db.get(&args[1]))?.and_then(|zset| {
        ordered(zset, rev)
            .iter()
            .position(|(member, _)| member == &args[2])
    });
    Ok(rank.map_or(Reply::Null, |rank| Reply::Integer(rank as i64)))
}

fn zrem(db: &mut Db, args: Args<'_>) -> HandlerResult {
    arity(args, 3, false)?;
    let removed = match db.get_mut(&args[1]) {
        None => 0,
        Some(Value::ZSet(zset)) => args[2..].iter().filter(|member| zset.remove(*member).is_some()).count(),
        Some(_) => return Err(Reply::wrong_type()),
    };
    db.remove_if_empty(&args[1]);
    Ok(Reply::Integer(removed as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(db: &mut Db, line: &str) -> Reply {
        let args: Vec<Vec<u8>> = line.split_whitespace().map(|s| s.as_bytes().to_vec()).collect();
        execute(db, &args)
    }

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.as_bytes().to_vec())
    }

    #[test]
    fn string_commands() {
        let mut db = Db::new();
        assert_eq!(run(&mut db, "SET k v"), Reply::ok());
        assert_eq!(run(&mut db, "GET k"), bulk("v"));
        assert_eq!(run(&mut db, "SET k w NX"), Reply::Null);
        assert_eq!(run(&mut db, "APPEND k xyz"), Reply::Integer(4));
        assert_eq!(run(&mut db, "GETRANGE k -3 -1"), bulk("xyz"));
        assert_eq!(run(&mut db, "DEL k missing"), Reply::Integer(1));
        assert_eq!(run(&mut db, "GET k"), Reply::Null);
        assert_eq!(run(&mut db, "INCRBY n 5"), Reply::Integer(5));
        assert_eq!(run(&mut db, "DECR n"), Reply::Integer(4));
        assert_eq!(run(&mut db, "TTL n"), Reply::Integer(-1));
        assert_eq!(run(&mut db, "EXPIRE n 10"), Reply::Integer(1));
        assert_eq!(run(&mut db, "TTL n"), Reply::Integer(10));
    }

    #[test]
    fn wrong_type_and_unknown_command() {
        let mut db = Db::new();
        run(&mut db, "LPUSH l a");
        assert!(matches!(run(&mut db, "GET l"), Reply::Error(msg) if msg.starts_with("WRONGTYPE")));
        assert!(matches!(run(&mut db, "FLUSHALL"), Reply::Error(msg) if msg.starts_with("ERR unknown")));
        assert!(matches!(run(&mut db, "GET"), Reply::Error(msg) if msg.contains("wrong number")));
    }

    #[test]
    fn list_commands() {
        let mut db = Db::new();
        assert_eq!(run(&mut db, "RPUSH l a b c"), Reply::Integer(3));
        assert_eq!(run(&mut db, "LPUSH l z"), Reply::Integer(4));
        assert_eq!(run(&mut db, "LRANGE l 0 -1"), Reply::array(["z", "a", "b", "c"].map(|s| s.as_bytes().to_vec())));
        assert_eq!(run(&mut db, "LINDEX l -1"), bulk("c"));
        assert_eq!(run(&mut db, "LPOP l"), bulk("z"));
        assert_eq!(run(&mut db, "LRANGE l 5 10"), Reply::Array(Vec::new()));
    }

    #[test]
    fn sorted_set_ranges() {
        let mut db = Db::new();
        assert_eq!(run(&mut db, "ZADD z 1 a 2 b 3 c"), Reply::Integer(3));
        assert_eq!(run(&mut db, "ZRANGEBYSCORE z (1 +inf"), Reply::array([b"b".to_vec(), b"c".to_vec()]));
        assert_eq!(
            run(&mut db, "ZREVRANGEBYSCORE z 3 -inf LIMIT 1 1"),
            Reply::array([b"b".to_vec()])
        );
        assert_eq!(run(&mut db, "ZCOUNT z -inf 2"), Reply::Integer(2));
        assert_eq!(run(&mut db, "ZREVRANK z a"), Reply::Integer(2));
        assert_eq!(run(&mut db, "ZINCRBY z 1.5 a"), bulk("2.5"));
        assert_eq!(
            run(&mut db, "ZRANGE z 0 0 WITHSCORES"),
            Reply::Array(vec![bulk("b"), bulk("2")])
        );
        assert_eq!(run(&mut db, "ZREM z a b c"), Reply::Integer(3));
        assert_eq!(run(&mut db, "TYPE z"), Reply::Simple("none"));
    }
}
