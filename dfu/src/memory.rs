//! Parser for the DfuSe memory-map string descriptor.
//!
//! Devices describe their flash layout as e.g.
//! `@Internal Flash/0x08000000/4*016Kg,1*064Kg,7*128Kg`, with repeated
//! `/0x<addr>/` address groups and comma-separated segment runs.
//! Parsing is best effort: malformed runs are skipped with a warning,
//! since a partially understood layout is still useful.

use nonempty::NonEmpty;
use regex::Regex;

use log::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
pub struct DfuMemory {
    pub name: String,
    pub segments: NonEmpty<DfuMemSegment>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DfuMemSegment {
    start_addr: u32,
    end_addr: u32,
    page_size: u32,
    mem_type: u8,
}

impl DfuMemory {
    /// Linear scan; device layouts are tens of segments at most.
    pub fn segment_at(&self, addr: u32) -> Option<&DfuMemSegment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    pub fn readable_at(&self, addr: u32) -> bool {
        self.segment_at(addr).is_some_and(|s| s.readable())
    }

    pub fn erasable_at(&self, addr: u32) -> bool {
        self.segment_at(addr).is_some_and(|s| s.erasable())
    }

    pub fn writable_at(&self, addr: u32) -> bool {
        self.segment_at(addr).is_some_and(|s| s.writable())
    }
}

impl DfuMemSegment {
    pub fn start_addr(&self) -> u32 {
        self.start_addr
    }
    /// Inclusive end address.
    pub fn end_addr(&self) -> u32 {
        self.end_addr
    }
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
    pub fn pages(&self) -> u32 {
        (self.end_addr - self.start_addr + 1) / self.page_size
    }
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start_addr && addr <= self.end_addr
    }
    /// Start of the page containing `addr`.
    pub fn page_start(&self, addr: u32) -> u32 {
        addr & !(self.page_size - 1)
    }
    pub fn readable(&self) -> bool {
        self.mem_type & 1 == 1
    }
    pub fn erasable(&self) -> bool {
        self.mem_type & 2 == 2
    }
    pub fn writable(&self) -> bool {
        self.mem_type & 4 == 4
    }
}

pub fn parse_memory_layout(desc: &str) -> Option<DfuMemory> {
    let name_re = Regex::new(r"^@?([^/]*?)\s*(/.*)$").unwrap();
    let group_re = Regex::new(r"/0x([\da-fA-F]+)U?/").unwrap();
    let run_re = Regex::new(r"^(\d+)\*(\d+)\s*([BKMa-g ]?)([a-g]?)$").unwrap();

    let captures = name_re.captures(desc)?;
    let name = String::from(&captures[1]);
    let groups = captures.get(2).unwrap().as_str();
    info!("DfuSe interface name: \"{}\"", name);

    // address groups: (start address, span of the run list)
    let marks: Vec<(u32, usize, usize)> = group_re
        .captures_iter(groups)
        .filter_map(|c| {
            let addr = u32::from_str_radix(&c[1], 16).ok()?;
            let m = c.get(0).unwrap();
            Some((addr, m.start(), m.end()))
        })
        .collect();

    let mut layout = Vec::new();
    for (i, &(group_addr, _, runs_start)) in marks.iter().enumerate() {
        let runs_end = marks
            .get(i + 1)
            .map(|&(_, next_group, _)| next_group)
            .unwrap_or(groups.len());
        let mut current_addr = group_addr;

        for run in groups[runs_start..runs_end].split(',') {
            let run = run.trim().trim_end_matches('/');
            if run.is_empty() {
                continue;
            }
            let Some(m) = run_re.captures(run) else {
                warn!("Skipping malformed memory segment \"{}\"", run);
                continue;
            };
            let sectors: u32 = m[1].parse().unwrap_or(0);
            let mut size: u32 = m[2].parse().unwrap_or(0);

            let mut mem_type = m[4].chars().next();
            match &m[3] {
                "K" => size = size.saturating_mul(1024),
                "M" => size = size.saturating_mul(1024 * 1024),
                "B" | " " | "" => {}
                other => {
                    // a lone a-g letter in multiplier position is a
                    // type identifier for a byte-sized segment
                    let c = other.chars().next().unwrap();
                    if mem_type.is_none() {
                        mem_type = Some(c);
                    } else {
                        warn!(
                            "Non-valid multiplier '{}', assuming bytes",
                            c
                        );
                    }
                }
            }

            // STM32F4 bootloaders omit the type letter here
            if name == "Device Feature" {
                mem_type = Some('e');
            }

            let Some(mem_type) = mem_type else {
                warn!("No valid type for segment \"{}\"", run);
                continue;
            };

            if sectors == 0 || size == 0 {
                warn!("Skipping empty memory segment \"{}\"", run);
                continue;
            }

            // a broken descriptor must not wrap around the address space
            let Some(next_addr) = sectors
                .checked_mul(size)
                .and_then(|span| current_addr.checked_add(span))
            else {
                warn!("Skipping out of range memory segment \"{}\"", run);
                continue;
            };

            let segment = DfuMemSegment {
                start_addr: current_addr,
                end_addr: next_addr - 1,
                page_size: size,
                mem_type: (mem_type as u8) & 7,
            };
            debug!(
                "Memory segment at 0x{:08x} {:3} x {:5} = {:6} ({}{}{})",
                current_addr,
                sectors,
                size,
                next_addr - current_addr,
                if segment.readable() { "r" } else { "" },
                if segment.erasable() { "e" } else { "" },
                if segment.writable() { "w" } else { "" },
            );
            current_addr = next_addr;
            layout.push(segment);
        }
    }

    NonEmpty::from_vec(layout).map(|segments| DfuMemory { name, segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nonempty::nonempty;

    #[test]
    fn test_single_segment() {
        let layout =
            parse_memory_layout("@Option Bytes   /0x5200201C/01*128 e");
        assert_eq!(
            layout,
            Some(DfuMemory {
                name: "Option Bytes".into(),
                segments: nonempty![DfuMemSegment {
                    start_addr: 0x5200201C,
                    end_addr: 0x5200201C + 128 - 1,
                    page_size: 128,
                    mem_type: b'e' & 7
                }],
            })
        );
    }

    #[test]
    fn test_stm32_flash_layout() {
        let layout = parse_memory_layout(
            "@Flash/0x08000000/4*016Kg,1*064Kg,7*128Kg",
        )
        .unwrap();
        assert_eq!(layout.name, "Flash");
        assert_eq!(layout.segments.len(), 3);

        let s = &layout.segments[0];
        assert_eq!(s.start_addr(), 0x0800_0000);
        assert_eq!(s.end_addr(), 0x0800_0000 + 4 * 16 * 1024 - 1);
        assert_eq!(s.page_size(), 16 * 1024);

        // cumulative addressing: each run starts where the previous ends
        let s = &layout.segments[1];
        assert_eq!(s.start_addr(), 0x0800_0000 + 4 * 16 * 1024);
        assert_eq!(s.end_addr(), 0x0800_0000 + 128 * 1024 - 1);
        assert_eq!(s.page_size(), 64 * 1024);

        let s = &layout.segments[2];
        assert_eq!(s.start_addr(), 0x0800_0000 + 128 * 1024);
        assert_eq!(s.end_addr(), 0x0800_0000 + (128 + 7 * 128) * 1024 - 1);
        assert_eq!(s.page_size(), 128 * 1024);

        // g = 0b111: readable, erasable, writable
        assert!(layout.readable_at(0x0800_0000));
        assert!(layout.erasable_at(0x0800_0000));
        assert!(layout.writable_at(0x0800_0000));
        assert!(!layout.writable_at(0x0900_0000));
    }

    #[test]
    fn test_multiple_address_groups() {
        let layout = parse_memory_layout(
            "@Internal Flash  /0x08000000/8*08Kg/0x1FFF0000/1*016Ka",
        )
        .unwrap();
        assert_eq!(layout.segments.len(), 2);
        assert_eq!(layout.segments[0].start_addr(), 0x0800_0000);
        assert_eq!(layout.segments[1].start_addr(), 0x1FFF_0000);
        // a = 0b001: read-only
        assert!(layout.readable_at(0x1FFF_0000));
        assert!(!layout.writable_at(0x1FFF_0000));
    }

    #[test]
    fn test_device_feature_forces_type() {
        // the forced 'e' letter masks to readable + writable
        let layout =
            parse_memory_layout("@Device Feature/0xFFFF0000/1*004 e")
                .unwrap();
        assert!(layout.readable_at(0xFFFF_0000));
        assert!(layout.writable_at(0xFFFF_0000));
        assert!(!layout.erasable_at(0xFFFF_0000));

        // forced even without a type letter
        let layout =
            parse_memory_layout("@Device Feature/0xFFFF0000/1*004B")
                .unwrap();
        assert!(layout.readable_at(0xFFFF_0000));
        assert!(layout.writable_at(0xFFFF_0000));
    }

    #[test]
    fn test_overflowing_run_is_skipped() {
        // 9999 * 999M does not fit in 32 bits of address space
        let layout = parse_memory_layout(
            "@Flash/0xFFFF0000/9999*999Mg,1*004Kg",
        )
        .unwrap();
        assert_eq!(layout.segments.len(), 1);
        assert_eq!(layout.segments[0].start_addr(), 0xFFFF_0000);
        assert_eq!(layout.segments[0].page_size(), 4 * 1024);
    }

    #[test]
    fn test_malformed_run_is_skipped() {
        let layout = parse_memory_layout(
            "@Flash/0x08000000/4*016Kg,bogus,1*064Kg",
        )
        .unwrap();
        assert_eq!(layout.segments.len(), 2);
        assert_eq!(
            layout.segments[1].start_addr(),
            0x0800_0000 + 4 * 16 * 1024
        );
    }

    #[test]
    fn test_unparsable_layout() {
        assert_eq!(parse_memory_layout("no layout here"), None);
        assert_eq!(parse_memory_layout("@Flash/0x08000000/"), None);
    }

    #[test]
    fn test_page_alignment() {
        let layout =
            parse_memory_layout("@Flash/0x08000000/4*016Kg").unwrap();
        let seg = layout.segment_at(0x0800_5000).unwrap();
        assert_eq!(seg.page_start(0x0800_5000), 0x0800_4000);
        assert_eq!(seg.pages(), 4);
    }
}
