use std::collections::VecDeque;
use std::fmt;

use crate::error::ConfigError;

// system specs

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, clap::ValueEnum)]
pub enum Protocol {
    /// invalidate-based, four line states
    #[default]
    Mesi,
    /// update-based, five line states
    Dragon,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Mesi => write!(f, "MESI"),
            Protocol::Dragon => write!(f, "Dragon"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SystemSpec {         // unit         reasonable defaults
    pub protocol: Protocol,
    pub word_size: u32,         // bytes        4
    pub address_size: u32,      // bytes        4
    pub mem_lat: u32,           // cpu          100
    pub bus_word_tf_lat: u32,   // cpu          2
    pub block_size: u32,        // bytes        32
    pub cache_size: u32,        // bytes        4096
    pub cache_assoc: u32,       // blocks       2
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            protocol: Protocol::Mesi,
            word_size: 4,
            address_size: 4,
            mem_lat: 100,
            bus_word_tf_lat: 2,
            block_size: 32,
            cache_size: 4096,
            cache_assoc: 2,
        }
    }
}

impl SystemSpec {
    /// Rejects geometries the caches cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("word size", self.word_size),
            ("address size", self.address_size),
            ("block size", self.block_size),
            ("cache size", self.cache_size),
            ("associativity", self.cache_assoc),
            ("memory latency", self.mem_lat),
            ("bus word transfer latency", self.bus_word_tf_lat),
        ];
        if let Some(&(what, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(what));
        }
        if self.block_size % self.word_size != 0 {
            return Err(ConfigError::BlockNotWordAligned {
                block_size: self.block_size,
                word_size: self.word_size,
            });
        }
        if self.address_size % self.word_size != 0 {
            return Err(ConfigError::AddressNotWordAligned {
                address_size: self.address_size,
                word_size: self.word_size,
            });
        }
        let set_bytes = u64::from(self.block_size) * u64::from(self.cache_assoc);
        if u64::from(self.cache_size) % set_bytes != 0 || self.num_sets() == 0 {
            return Err(ConfigError::Geometry {
                cache_size: self.cache_size,
                block_size: self.block_size,
                cache_assoc: self.cache_assoc,
            });
        }
        Ok(())
    }

    pub fn num_sets(&self) -> u32 {
        let set_bytes = u64::from(self.block_size) * u64::from(self.cache_assoc);
        if set_bytes == 0 {
            return 0;
        }
        (u64::from(self.cache_size) / set_bytes) as u32
    }

    // timing

    /// first phase of every bus transaction: putting the request on the bus
    pub fn t_cache_to_cache_msg(&self) -> u32 {
        // assuming immediate response through wired OR
        self.bus_word_tf_lat * self.address_size / self.word_size
    }
    pub fn t_cache_to_cache_transfer(&self) -> u32 {
        self.bus_word_tf_lat * self.block_size / self.word_size
    }
    pub fn t_flush(&self) -> u32 {
        self.mem_lat
    }
    pub fn t_mem_fetch(&self) -> u32 {
        self.mem_lat
    }
    pub fn t_evict(&self) -> u32 {
        self.mem_lat
    }
    pub fn t_update(&self) -> u32 {
        self.bus_word_tf_lat
    }
}

// addresses and blocks

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Addr(pub u32);

impl Addr {
    /// get cache index and tag of this address under given system specs
    pub fn pos(&self, specs: &SystemSpec) -> (u32, u32) {
        let block = self.0 / specs.block_size;
        let num_indices = specs.num_sets();
        let index = block % num_indices;
        let tag = block / num_indices;
        (index, tag)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// instructions

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Read(Addr),
    Write(Addr),
    Other(u32),
}

pub type Instructions = VecDeque<Instr>;

// the memory access a processor hands to its cache
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcCacheReq {
    Read(Addr),
    Write(Addr),
}

impl ProcCacheReq {
    pub fn addr(&self) -> Addr {
        match self {
            ProcCacheReq::Read(addr) | ProcCacheReq::Write(addr) => *addr,
        }
    }
    pub fn is_write(&self) -> bool {
        matches!(self, ProcCacheReq::Write(_))
    }
}
