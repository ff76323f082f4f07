//! Redis-backed [`SharedStore`] for multi-instance deployments.
//!
//! Plain writes map to `SET`/`GET`/`DEL`; the compare operations run as Lua scripts so the
//! check and the write happen in one server-side step.

// crates.io
use ::redis::{Client, Cmd, FromRedisValue, RedisError, Script, aio::ConnectionManager, cmd};
// self
use crate::{
	_prelude::*,
	store::{CompareAndSwapOutcome, SharedStore, StoreError, StoreFuture, StoreKey},
};

const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
	if not current then return 2 end
	if current ~= ARGV[2] then return 1 end
elseif current then
	return 1
end
if tonumber(ARGV[4]) > 0 then
	redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
else
	redis.call('SET', KEYS[1], ARGV[3])
end
return 0
";
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
	return redis.call('DEL', KEYS[1])
end
return 0
";

/// Shared store speaking to a Redis server through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
	conn: ConnectionManager,
	prefix: String,
	compare_and_swap: Script,
	compare_and_delete: Script,
}
impl RedisStore {
	/// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = Client::open(url).map_err(backend)?;
		let conn = ConnectionManager::new(client).await.map_err(backend)?;

		Ok(Self::with_connection(conn))
	}

	/// Wraps an existing connection manager.
	pub fn with_connection(conn: ConnectionManager) -> Self {
		Self {
			conn,
			prefix: String::new(),
			compare_and_swap: Script::new(COMPARE_AND_SWAP),
			compare_and_delete: Script::new(COMPARE_AND_DELETE),
		}
	}

	/// Prepends `prefix` to every key so several deployments can share one server.
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into();

		self
	}

	fn key(&self, key: &StoreKey) -> String {
		format!("{}{key}", self.prefix)
	}

	async fn query<T>(&self, command: Cmd) -> Result<T, StoreError>
	where
		T: FromRedisValue,
	{
		let mut conn = self.conn.clone();

		command.query_async::<_, T>(&mut conn).await.map_err(backend)
	}
}
impl Debug for RedisStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedisStore").field("prefix", &self.prefix).finish()
	}
}
impl SharedStore for RedisStore {
	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move {
			let mut command = cmd("GET");

			command.arg(self.key(key));

			self.query(command).await
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut command = cmd("SET");

			command.arg(self.key(key)).arg(value);

			if let Some(ttl) = ttl {
				command.arg("PX").arg(ttl_millis(ttl));
			}

			self.query(command).await
		})
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut command = cmd("SET");

			command.arg(self.key(key)).arg(value).arg("NX").arg("PX").arg(ttl_millis(ttl));

			let reply: Option<String> = self.query(command).await?;

			Ok(reply.is_some())
		})
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut conn = self.conn.clone();
			let code: i64 = self
				.compare_and_swap
				.key(self.key(key))
				.arg(if expected.is_some() { "1" } else { "0" })
				.arg(expected.unwrap_or_default())
				.arg(replacement)
				.arg(ttl.map(ttl_millis).unwrap_or(0))
				.invoke_async(&mut conn)
				.await
				.map_err(backend)?;

			match code {
				0 => Ok(CompareAndSwapOutcome::Updated),
				1 => Ok(CompareAndSwapOutcome::Mismatch),
				2 => Ok(CompareAndSwapOutcome::Missing),
				other => Err(StoreError::Backend {
					message: format!("compare-and-swap script returned unexpected code {other}"),
				}),
			}
		})
	}

	fn compare_and_delete<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: &'a str,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut conn = self.conn.clone();
			let deleted: i64 = self
				.compare_and_delete
				.key(self.key(key))
				.arg(expected)
				.invoke_async(&mut conn)
				.await
				.map_err(backend)?;

			Ok(deleted > 0)
		})
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut command = cmd("DEL");

			command.arg(self.key(key));

			let deleted: i64 = self.query(command).await?;

			Ok(deleted > 0)
		})
	}
}

fn backend(e: RedisError) -> StoreError {
	StoreError::Backend { message: e.to_string() }
}

fn ttl_millis(ttl: Duration) -> i64 {
	ttl.whole_milliseconds().clamp(1, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ttl_is_clamped_to_one_millisecond() {
		assert_eq!(ttl_millis(Duration::ZERO), 1);
		assert_eq!(ttl_millis(Duration::milliseconds(-5)), 1);
		assert_eq!(ttl_millis(Duration::seconds(30)), 30_000);
	}
}
