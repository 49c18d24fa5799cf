use std::{env, fmt, str::FromStr};

use crate::error::{Result, WorkerErr};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;

/// The compute device a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu { index: usize },
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu { index } => write!(f, "cpu:{index}"),
        }
    }
}

/// Who this process is inside the process group. Built once in `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
    pub device: Device,
    /// `host:port` of rank 0's listener.
    pub master_addr: String,
}

impl RuntimeContext {
    /// A single member group, used when no launcher variables are present.
    pub fn single() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
            device: Device::Cpu { index: 0 },
            master_addr: format!("{DEFAULT_MASTER_ADDR}:{DEFAULT_MASTER_PORT}"),
        }
    }

    /// Reads `RANK`, `LOCAL_RANK`, `WORLD_SIZE`, `MASTER_ADDR` and `MASTER_PORT`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as `from_env` but reading through `lookup`.
    ///
    /// # Arguments
    /// * `lookup` - Resolves a variable name to its value, if set.
    ///
    /// # Returns
    /// The single process context when `RANK` is absent.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(rank) = lookup("RANK") else {
            return Ok(Self::single());
        };

        let rank = parse_var("RANK", &rank)?;
        let world_size = match lookup("WORLD_SIZE") {
            Some(value) => parse_var("WORLD_SIZE", &value)?,
            None => return Err(WorkerErr::Config("RANK is set but WORLD_SIZE is not".into())),
        };
        let local_rank = match lookup("LOCAL_RANK") {
            Some(value) => parse_var("LOCAL_RANK", &value)?,
            None => rank,
        };

        if world_size == 0 || rank >= world_size {
            return Err(WorkerErr::Config(format!(
                "rank {rank} is outside a world of size {world_size}"
            )));
        }

        let host = lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string());
        let port: u16 = match lookup("MASTER_PORT") {
            Some(value) => parse_var("MASTER_PORT", &value)?,
            None => DEFAULT_MASTER_PORT,
        };
        let master_addr = format!("{host}:{port}");

        Ok(Self {
            rank,
            local_rank,
            world_size,
            device: Device::Cpu { index: local_rank },
            master_addr,
        })
    }

    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// Rank 0 does the logging.
    pub fn is_master(&self) -> bool {
        self.rank == 0
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| WorkerErr::Config(format!("invalid {key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_rank_means_single_process() {
        let ctx = RuntimeContext::from_vars(vars(&[("WORLD_SIZE", "4")])).unwrap();
        assert_eq!(ctx, RuntimeContext::single());
        assert!(ctx.is_master());
        assert!(!ctx.is_distributed());
    }

    #[test]
    fn reads_launcher_variables() {
        let ctx = RuntimeContext::from_vars(vars(&[
            ("RANK", "3"),
            ("LOCAL_RANK", "1"),
            ("WORLD_SIZE", "4"),
            ("MASTER_ADDR", "10.0.0.2"),
            ("MASTER_PORT", "1234"),
        ]))
        .unwrap();

        assert_eq!(ctx.rank, 3);
        assert_eq!(ctx.local_rank, 1);
        assert_eq!(ctx.world_size, 4);
        assert_eq!(ctx.device.to_string(), "cpu:1");
        assert_eq!(ctx.master_addr, "10.0.0.2:1234");
        assert!(!ctx.is_master());
    }

    #[test]
    fn rejects_rank_outside_world() {
        let err = RuntimeContext::from_vars(vars(&[("RANK", "2"), ("WORLD_SIZE", "2")]));
        assert!(matches!(err, Err(WorkerErr::Config(_))));

        let err = RuntimeContext::from_vars(vars(&[("RANK", "0")]));
        assert!(matches!(err, Err(WorkerErr::Config(_))));

        let err = RuntimeContext::from_vars(vars(&[("RANK", "x"), ("WORLD_SIZE", "2")]));
        assert!(matches!(err, Err(WorkerErr::Config(_))));
    }
}
