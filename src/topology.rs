// SCHEDULING DOMAIN HIERARCHY
// A FOREST OF DOMAINS OVER THE CORE SET, ONE NODE PER SHARED RESOURCE
// (CACHE LEVEL), BUILT ONCE AT INIT FROM PER-CORE LEVEL CHAINS AND
// READ-ONLY AFTERWARDS. DOMAINS DEDUP PER LEVEL BY COVERAGE; GROUPS
// PARTITION EACH DOMAIN INTO ITS CHILD DOMAINS (SINGLETON CORES AT THE
// LEAVES). ANY BUILD FAILURE RETURNS Err AND THE PARTIAL ARENA DROPS --
// NO HALF-BUILT HIERARCHY EVER ESCAPES.
//
//    O----------[0 1 2 3 4 5 6 7]
//    |           /             \
//    O----[0 1 2 3]---------[4 5 6 7]
//    |    /      \          /      \
//    O--[0 1]--[2 3]-----[4 5]--[6 7]

use std::fs;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::mask::CoreSet;

// DOMAIN REPRESENTS A CACHE-SHARING LEVEL RELEVANT TO PLACEMENT/STEALING
pub const DOMAIN_CACHE: u32 = 1 << 0;

pub type DomainId = usize;

// ONE LEVEL OF A CORE'S CHAIN, LEAF TO ROOT: THE CORES SHARING THE
// RESOURCE AT THAT LEVEL, PLUS THE SHARING FLAGS
#[derive(Clone, Debug)]
pub struct TopologyLevel {
    pub cores: CoreSet,
    pub flags: u32,
}

#[derive(Debug)]
pub struct Group {
    pub cores: CoreSet,
}

#[derive(Debug)]
pub struct Domain {
    pub cores: CoreSet,
    pub flags: u32,
    // INDEX LINK, NEVER OWNING; None AT A ROOT
    pub parent: Option<DomainId>,
    pub groups: Vec<Group>,
    pub level: usize,
}

pub struct Topology {
    domains: Vec<Domain>,
    // DOMAIN IDS PER LEVEL, CREATION ORDER
    levels: Vec<Vec<DomainId>>,
    // PER-CORE LEAF DOMAIN
    leaf: Vec<Option<DomainId>>,
}

impl Topology {
    // EMPTY HIERARCHY (UNICORE -- NOTHING TO SHARE, NOTHING TO WALK)
    pub fn flat(nr_cores: usize) -> Self {
        Self {
            domains: Vec::new(),
            levels: Vec::new(),
            leaf: vec![None; nr_cores],
        }
    }

    pub fn build(nr_cores: usize, chains: &[Vec<TopologyLevel>]) -> Result<Self> {
        if chains.len() != nr_cores {
            bail!(
                "topology: {} chains for {} cores",
                chains.len(),
                nr_cores
            );
        }

        let mut topo = Topology::flat(nr_cores);
        if chains.iter().all(|c| c.is_empty()) {
            return Ok(topo);
        }

        for core in 0..nr_cores {
            topo.thread_core(core, &chains[core])?;
        }
        topo.build_groups();
        topo.verify_partition()?;

        Ok(topo)
    }

    // WALK ONE CORE'S CHAIN LEAF-TO-ROOT, REUSING ANY DOMAIN AT A LEVEL
    // THAT ALREADY COVERS THE CORE AND STOPPING AT THE FIRST REUSE (THE
    // REST OF THE CHAIN IS ALREADY THREADED)
    fn thread_core(&mut self, core: usize, chain: &[TopologyLevel]) -> Result<()> {
        let mut lower: Option<DomainId> = None;

        for (level, t) in chain.iter().enumerate() {
            if !t.cores.test(core) {
                bail!("topology: level {} of core {} does not cover it", level, core);
            }
            if self.levels.len() <= level {
                self.levels.push(Vec::new());
            }

            let seen = self.levels[level]
                .iter()
                .copied()
                .find(|&id| self.domains[id].cores.test(core));

            let id = match seen {
                Some(id) => id,
                None => {
                    let id = self.domains.len();
                    self.domains.push(Domain {
                        cores: t.cores.clone(),
                        flags: t.flags,
                        parent: None,
                        groups: Vec::new(),
                        level,
                    });
                    self.levels[level].push(id);
                    id
                }
            };

            if let Some(lo) = lower {
                self.domains[lo].parent = Some(id);
            } else {
                self.leaf[core] = Some(id);
            }

            if seen.is_some() {
                break;
            }
            lower = Some(id);
        }

        Ok(())
    }

    // UPPER DOMAINS PARTITION INTO THE CHILD-LEVEL DOMAINS THEY COVER;
    // LEAF DOMAINS PARTITION INTO SINGLETON CORES
    fn build_groups(&mut self) {
        for level in (1..self.levels.len()).rev() {
            for di in 0..self.levels[level].len() {
                let id = self.levels[level][di];
                let groups: Vec<Group> = self.levels[level - 1]
                    .iter()
                    .filter(|&&child| self.domains[child].cores.is_subset(&self.domains[id].cores))
                    .map(|&child| Group {
                        cores: self.domains[child].cores.clone(),
                    })
                    .collect();
                self.domains[id].groups = groups;
            }
        }

        let leaves: Vec<DomainId> = self.levels.first().cloned().unwrap_or_default();
        for id in leaves {
            let groups: Vec<Group> = self.domains[id]
                .cores
                .iter()
                .map(|core| Group {
                    cores: CoreSet::single(core),
                })
                .collect();
            self.domains[id].groups = groups;
        }
    }

    // EVERY DOMAIN'S CORES MUST EQUAL THE DISJOINT UNION OF ITS GROUPS
    pub fn verify_partition(&self) -> Result<()> {
        for (id, d) in self.domains.iter().enumerate() {
            let mut union = CoreSet::new();
            let mut total = 0usize;
            for g in &d.groups {
                union.union_with(&g.cores);
                total += g.cores.weight();
            }
            if union != d.cores || total != d.cores.weight() {
                bail!(
                    "topology: domain {} [{}] groups do not partition it",
                    id,
                    d.cores
                );
            }
        }
        Ok(())
    }

    pub fn domain(&self, id: DomainId) -> &Domain {
        &self.domains[id]
    }

    pub fn leaf(&self, core: usize) -> Option<DomainId> {
        self.leaf.get(core).copied().flatten()
    }

    pub fn nr_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[DomainId] {
        &self.levels[level]
    }

    pub fn nr_domains(&self) -> usize {
        self.domains.len()
    }

    // LEAF-TO-ROOT DOMAIN CHAIN FROM A CORE'S LEAF DOMAIN
    pub fn chain(&self, core: usize) -> DomainChain<'_> {
        DomainChain {
            topo: self,
            next: self.leaf(core),
        }
    }
}

pub struct DomainChain<'a> {
    topo: &'a Topology,
    next: Option<DomainId>,
}

impl<'a> Iterator for DomainChain<'a> {
    type Item = (DomainId, &'a Domain);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let d = self.topo.domain(id);
        self.next = d.parent;
        Some((id, d))
    }
}

// SYNTHETIC CHAINS FOR SIMULATION AND TESTS: EACH SPAN IS A CACHE-SHARING
// BLOCK SIZE (E.G. [2, 4] -> PAIRS SHARE L2, QUADS SHARE L3), TOPPED BY A
// MACHINE-WIDE LEVEL THAT IS NOT A SHARING LEVEL
pub fn synthetic(nr_cores: usize, spans: &[usize]) -> Vec<Vec<TopologyLevel>> {
    if nr_cores <= 1 {
        return vec![Vec::new(); nr_cores];
    }

    (0..nr_cores)
        .map(|core| {
            let mut chain = Vec::new();
            for &span in spans {
                // A MACHINE-WIDE SPAN STILL COUNTS AS A SHARING LEVEL
                // (SHARED LAST-LEVEL CACHE); OVERSIZED SPANS DO NOT
                if span < 2 || span > nr_cores {
                    continue;
                }
                let start = core / span * span;
                let end = (start + span).min(nr_cores);
                let mut cores = CoreSet::new();
                for c in start..end {
                    cores.set(c);
                }
                chain.push(TopologyLevel {
                    cores,
                    flags: DOMAIN_CACHE,
                });
            }
            chain.push(TopologyLevel {
                cores: CoreSet::all(nr_cores),
                flags: 0,
            });
            chain
        })
        .collect()
}

// SYSFS CPU-LIST GRAMMAR: COMMA-SEPARATED SINGLE IDS OR LO-HI RANGES
pub fn parse_cpu_list(list: &str) -> Result<CoreSet> {
    let re = Regex::new(r"^(\d+)(?:-(\d+))?$").expect("static regex");
    let mut set = CoreSet::new();
    let trimmed = list.trim();
    if trimmed.is_empty() {
        return Ok(set);
    }
    for part in trimmed.split(',') {
        let caps = re
            .captures(part.trim())
            .with_context(|| format!("bad cpu list segment: {:?}", part))?;
        let lo: usize = caps[1].parse()?;
        let hi: usize = match caps.get(2) {
            Some(m) => m.as_str().parse()?,
            None => lo,
        };
        if hi < lo {
            bail!("bad cpu range: {}-{}", lo, hi);
        }
        for core in lo..=hi {
            set.set(core);
        }
    }
    Ok(set)
}

// DETECT THE HOST'S CACHE TOPOLOGY FROM SYSFS. UNIFIED/DATA CACHES OF
// LEVEL >= 2 BECOME SHARING LEVELS; A MACHINE-WIDE ROOT TOPS EVERY CHAIN.
pub fn detect_host(nr_cores: usize) -> Result<Vec<Vec<TopologyLevel>>> {
    let mut chains = Vec::with_capacity(nr_cores);

    for core in 0..nr_cores {
        let cache_dir = format!("/sys/devices/system/cpu/cpu{}/cache", core);
        let mut levels: Vec<(u32, CoreSet)> = Vec::new();

        let entries = fs::read_dir(&cache_dir)
            .with_context(|| format!("no cache topology under {}", cache_dir))?;
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.starts_with("index") {
                continue;
            }
            let cache_type = fs::read_to_string(path.join("type")).unwrap_or_default();
            if cache_type.trim() == "Instruction" {
                continue;
            }
            let level: u32 = fs::read_to_string(path.join("level"))
                .unwrap_or_default()
                .trim()
                .parse()
                .unwrap_or(0);
            if level < 2 {
                continue;
            }
            let shared = fs::read_to_string(path.join("shared_cpu_list"))
                .with_context(|| format!("{}: no shared_cpu_list", path.display()))?;
            let cores = parse_cpu_list(&shared)?;
            if !cores.test(core) {
                bail!("cpu{}: cache level {} list [{}] omits the cpu", core, level, cores);
            }
            levels.push((level, cores));
        }

        levels.sort_by_key(|&(level, _)| level);
        levels.dedup_by(|a, b| a.1 == b.1);

        let mut chain: Vec<TopologyLevel> = levels
            .into_iter()
            .map(|(_, cores)| TopologyLevel {
                cores,
                flags: DOMAIN_CACHE,
            })
            .collect();
        chain.push(TopologyLevel {
            cores: CoreSet::all(nr_cores),
            flags: 0,
        });
        chains.push(chain);
    }

    Ok(chains)
}
