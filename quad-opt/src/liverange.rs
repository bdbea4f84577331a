//! Live-range reduction and register allocation.
//!
//! Names produced by the rename pass are packed into the four lanes of the
//! physical temporary registers. The allocator reuses lanes as soon as their
//! last consumer has executed, merges names linked by identity copies into
//! one cluster so the copies can later collapse, and may place a name into a
//! register under a non-identity lane permutation. Opcodes with a SIMD4
//! result pin their lanes to the identity permutation.

use std::array;

use quad_asm::{Bank, Instruction, Lane, Opcode, Program, RegId, Swizzle, WriteMask, LANE_COUNT};

use crate::error::OptError;
use crate::params::ArchParams;
use crate::tables::temp_index_bound;

/// The 24 lane permutations, one column per choice: permutation `m` maps
/// name lane `l` to register lane `LANE_MAPPINGS[l][m]`. Choice 0 is the
/// identity, which first-fit therefore prefers.
const LANE_MAPPINGS: [[Lane; 24]; LANE_COUNT] = [
    [
        0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3,
    ],
    [
        1, 1, 2, 2, 3, 3, 0, 0, 2, 2, 3, 3, 0, 0, 1, 1, 3, 3, 0, 0, 1, 1, 2, 2,
    ],
    [
        2, 3, 1, 3, 1, 2, 2, 3, 0, 3, 0, 2, 1, 3, 0, 3, 0, 1, 1, 2, 0, 2, 0, 1,
    ],
    [
        3, 2, 3, 1, 2, 1, 3, 2, 3, 0, 2, 0, 3, 1, 3, 0, 1, 0, 2, 1, 2, 0, 1, 0,
    ],
];

/// Bitmap over the instructions of the program.
#[derive(Debug, Clone)]
struct InstrBits {
    words: Vec<u64>,
}

impl InstrBits {
    fn new(len: usize) -> Self {
        InstrBits {
            words: vec![0; (len + 63) / 64],
        }
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Union `other` into `self`; a bit set on both sides is a conflict and
    /// reports the first offending instruction index.
    fn merge_checked(&mut self, other: &InstrBits) -> Result<(), usize> {
        for (word_index, (dst, &src)) in self.words.iter_mut().zip(&other.words).enumerate() {
            let clash = *dst & src;
            if clash != 0 {
                return Err(word_index * 64 + clash.trailing_zeros() as usize);
            }
            *dst |= src;
        }
        Ok(())
    }
}

/// How one name is created, consumed, copied and finally placed.
///
/// All instruction references are 1-based; 0 means "never".
#[derive(Debug, Clone)]
struct NameUsage {
    created_by: [u32; LANE_COUNT],
    last_used: [u32; LANE_COUNT],
    /// Per operand position, per lane: the instructions reading that lane.
    used_by_op: [[InstrBits; LANE_COUNT]; 3],
    /// Per instruction: most lanes of this name consumed at once.
    packed_use: Vec<u8>,
    max_packed: u8,
    /// Copy origin per lane (source name, source lane, creating instruction).
    copied_reg: [RegId; LANE_COUNT],
    copied_comp: [Lane; LANE_COUNT],
    copied_from: [u32; LANE_COUNT],
    /// Copies taken of each lane: `(destination name, destination lane)`.
    copies: [Vec<(RegId, Lane)>; LANE_COUNT],
    /// Representative of the copy cluster this name was aggregated into.
    master: RegId,
    /// Lanes that appear in a SIMD4-result instruction and therefore must
    /// keep identity placement.
    simd4_lane: [bool; LANE_COUNT],
    allocated: bool,
    /// Physical placement per lane: `(register, register lane)`.
    alloc: [Option<(RegId, Lane)>; LANE_COUNT],
}

impl NameUsage {
    fn new(instructions: usize) -> Self {
        NameUsage {
            created_by: [0; LANE_COUNT],
            last_used: [0; LANE_COUNT],
            used_by_op: array::from_fn(|_| array::from_fn(|_| InstrBits::new(instructions))),
            packed_use: vec![0; instructions],
            max_packed: 0,
            copied_reg: [0; LANE_COUNT],
            copied_comp: [0; LANE_COUNT],
            copied_from: [0; LANE_COUNT],
            copies: array::from_fn(|_| Vec::new()),
            master: 0,
            simd4_lane: [false; LANE_COUNT],
            allocated: false,
            alloc: [None; LANE_COUNT],
        }
    }
}

/// One lane of one physical register in the allocation table.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    occupied_by_name: RegId,
    occupied_by_lane: Lane,
    /// Instructions at or after this index may reuse the slot (1-based; 0 is
    /// always free).
    free_from: u32,
}

fn two_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert!(a != b);
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

fn analyze(program: &[Instruction], names_bound: usize) -> Result<Vec<NameUsage>, OptError> {
    let mut usage: Vec<NameUsage> = (0..names_bound)
        .map(|_| NameUsage::new(program.len()))
        .collect();

    for (index, instr) in program.iter().enumerate() {
        match instr.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Chs | Opcode::Flr => continue,
            _ => {}
        }

        let reads = instr.read_components();
        let simd4 = instr.opcode().has_simd4_result();
        let mut result_is_copy = false;

        for slot in 0..instr.opcode().operand_arity() {
            let op = instr.op(slot);
            if op.bank != Bank::Temp {
                continue;
            }
            let positions = if slot == 1 { &reads.op2 } else { &reads.op1 };
            let lanes = op.swizzle.lanes();
            let name = op.reg as usize;

            for &position in positions {
                let lane = lanes[position];
                usage[name].used_by_op[slot][lane].set(index);
                usage[name].last_used[lane] = index as u32 + 1;
                if simd4 {
                    usage[name].simd4_lane[lane] = true;
                }
            }

            let packed = (0..LANE_COUNT)
                .filter(|&lane| usage[name].used_by_op[slot][lane].get(index))
                .count() as u8;
            usage[name].max_packed = usage[name].max_packed.max(packed);
            usage[name].packed_use[index] = usage[name].packed_use[index].max(packed);

            // Identity copies feed the aggregation stage.
            let dest = instr.dest();
            if slot == 0
                && instr.opcode() == Opcode::Mov
                && !dest.saturate
                && !op.has_modifier()
                && dest.bank == Bank::Temp
                && dest.reg as usize != name
            {
                let written = dest.mask.written_lanes();
                let (src, dst) = two_mut(&mut usage, name, dest.reg as usize);
                for (position_index, &position) in positions.iter().enumerate() {
                    let src_lane = lanes[position];
                    let dst_lane = written[position_index];
                    dst.copied_from[dst_lane] = src.created_by[src_lane];
                    dst.copied_reg[dst_lane] = op.reg;
                    dst.copied_comp[dst_lane] = src_lane;
                    src.copies[src_lane].push((dest.reg, dst_lane));
                }
                result_is_copy = true;
            }
        }

        if instr.writes_result() && instr.dest().bank == Bank::Temp {
            let reg = instr.dest().reg;
            let name = reg as usize;
            let written = instr.dest().mask.written_lanes();

            for &lane in &written {
                if usage[name].created_by[lane] != 0 && !instr.is_predicated() {
                    return Err(OptError::NameRedefined {
                        name: reg,
                        lane,
                        first: usage[name].created_by[lane] as usize - 1,
                        second: index,
                    });
                }
                usage[name].created_by[lane] = index as u32 + 1;

                if !result_is_copy {
                    usage[name].copied_from[lane] = 0;
                    usage[name].copied_reg[lane] = 0;
                    usage[name].copied_comp[lane] = 0;
                    usage[name].copies[lane].clear();
                }
            }

            // A SIMD4 result claims the whole register: every lane counts as
            // created and used here, pinned to identity placement.
            if simd4 {
                for lane in 0..LANE_COUNT {
                    usage[name].created_by[lane] = index as u32 + 1;
                    usage[name].last_used[lane] = usage[name].last_used[lane].max(index as u32 + 1);
                    usage[name].simd4_lane[lane] = true;
                }
            }

            let packed_write = if simd4 { LANE_COUNT as u8 } else { written.len() as u8 };
            usage[name].max_packed = usage[name].max_packed.max(packed_write);
        }
    }

    Ok(usage)
}

/// Aggregate copy-linked names under a master, when every lane of the copy
/// is either uncreated, a same-lane copy of the master cluster, or created
/// only after the master's lane went dead.
fn aggregate(usage: &mut [NameUsage]) -> Result<(), OptError> {
    for name in 1..usage.len() {
        for comp in 0..LANE_COUNT {
            let master = match usage[name].master {
                0 => name,
                m => m as usize,
            };

            for (copy_reg, _) in usage[name].copies[comp].clone() {
                let copy = copy_reg as usize;
                if usage[copy].master != 0 || copy == master {
                    continue;
                }

                let compatible = (0..LANE_COUNT).all(|lane| {
                    let cu = &usage[copy];
                    if cu.created_by[lane] == 0 {
                        return true;
                    }
                    let same_lane_copy = cu.copied_comp[lane] == lane && {
                        let src = cu.copied_reg[lane] as usize;
                        src == master || usage[src].master as usize == master
                    };
                    same_lane_copy || cu.created_by[lane] >= usage[master].last_used[lane]
                });

                if compatible {
                    merge(usage, copy, master)?;
                }
            }
        }
    }
    Ok(())
}

fn merge(usage: &mut [NameUsage], copy: usize, master: usize) -> Result<(), OptError> {
    let (cu, mu) = two_mut(usage, copy, master);
    cu.master = master as RegId;

    for lane in 0..LANE_COUNT {
        if mu.created_by[lane] == 0 {
            mu.created_by[lane] = cu.created_by[lane];
        }
        if cu.last_used[lane] != 0 && cu.last_used[lane] > mu.last_used[lane] {
            mu.last_used[lane] = cu.last_used[lane];
        }
        for op in 0..3 {
            mu.used_by_op[op][lane]
                .merge_checked(&cu.used_by_op[op][lane])
                .map_err(|instr| OptError::AggregationConflict {
                    name: copy as RegId,
                    master: master as RegId,
                    lane,
                    instr,
                })?;
        }
        mu.simd4_lane[lane] |= cu.simd4_lane[lane];
    }

    mu.max_packed = mu.max_packed.max(cu.max_packed);
    for index in 0..mu.packed_use.len() {
        mu.packed_use[index] = mu.packed_use[index].max(cu.packed_use[index]);
    }
    Ok(())
}

/// First register and lane permutation able to hold every created lane of
/// the name from its creation times onward.
fn find_packed_slot(
    usage: &NameUsage,
    mapping: &[[Slot; LANE_COUNT]],
) -> Option<(usize, [Lane; LANE_COUNT])> {
    for (reg, slots) in mapping.iter().enumerate() {
        let can_map: [[bool; LANE_COUNT]; LANE_COUNT] = array::from_fn(|lane| {
            array::from_fn(|reg_lane| {
                let fits = usage.created_by[lane] == 0
                    || slots[reg_lane].free_from <= usage.created_by[lane];
                fits && !(usage.simd4_lane[lane] && lane != reg_lane)
            })
        });

        for choice in 0..24 {
            let perm: [Lane; LANE_COUNT] = array::from_fn(|lane| LANE_MAPPINGS[lane][choice]);
            if (0..LANE_COUNT).all(|lane| can_map[lane][perm[lane]]) {
                return Some((reg, perm));
            }
        }
    }
    None
}

fn allocate_packed(
    usage: &mut [NameUsage],
    mapping: &mut [[Slot; LANE_COUNT]],
    name: usize,
    index: usize,
) -> Result<(), OptError> {
    if usage[name].allocated {
        // Record the lanes this instruction creates in the existing
        // placement.
        for lane in 0..LANE_COUNT {
            if usage[name].created_by[lane] == index as u32 + 1 {
                let (reg, reg_lane) = usage[name].alloc[lane].expect("placed lane");
                mapping[reg as usize][reg_lane].occupied_by_name = name as RegId;
                mapping[reg as usize][reg_lane].occupied_by_lane = lane;
            }
        }
        return Ok(());
    }

    let (reg, perm) = find_packed_slot(&usage[name], mapping).ok_or(
        OptError::NoRegisterForName {
            name: name as RegId,
        },
    )?;

    usage[name].allocated = true;
    for lane in 0..LANE_COUNT {
        let created = usage[name].created_by[lane];
        if created == 0 {
            continue;
        }
        let slot = &mut mapping[reg][perm[lane]];
        slot.free_from = usage[name].last_used[lane];
        if created == index as u32 + 1 {
            slot.occupied_by_name = name as RegId;
            slot.occupied_by_lane = lane;
        }
        usage[name].alloc[lane] = Some((reg as RegId, perm[lane]));
    }
    tracing::trace!(name, reg, ?perm, "packed allocation");
    Ok(())
}

fn allocate_unpacked(
    usage: &mut [NameUsage],
    mapping: &mut [[Slot; LANE_COUNT]],
    name: usize,
    written: &[Lane],
) -> Result<(), OptError> {
    for &lane in written {
        if usage[name].alloc[lane].is_some() {
            continue;
        }
        let created = usage[name].created_by[lane];

        let found = mapping.iter().enumerate().find_map(|(reg, slots)| {
            (0..LANE_COUNT).find_map(|reg_lane| {
                let fits = slots[reg_lane].free_from <= created
                    && !(usage[name].simd4_lane[lane] && reg_lane != lane);
                fits.then_some((reg, reg_lane))
            })
        });
        let (reg, reg_lane) = found.ok_or(OptError::NoRegisterForName {
            name: name as RegId,
        })?;

        mapping[reg][reg_lane] = Slot {
            occupied_by_name: name as RegId,
            occupied_by_lane: lane,
            free_from: usage[name].last_used[lane],
        };
        usage[name].alloc[lane] = Some((reg as RegId, reg_lane));
    }
    Ok(())
}

/// Allocate names to physical registers and rewrite the program.
///
/// Returns the rewritten program and the maximum number of simultaneously
/// live physical temporaries.
pub fn reduce_live_registers(
    program: &[Instruction],
    params: &ArchParams,
    names_used: u32,
) -> Result<(Program, u32), OptError> {
    let names_bound = temp_index_bound(program, names_used as usize + 1);
    let mut usage = analyze(program, names_bound)?;
    aggregate(&mut usage)?;

    let mut mapping: Vec<[Slot; LANE_COUNT]> =
        vec![[Slot::default(); LANE_COUNT]; params.temp_registers];
    let mut max_live: u32 = 0;
    let mut out = Program::with_capacity(program.len());

    for (index, instr) in program.iter().enumerate() {
        let live = mapping
            .iter()
            .filter(|slots| slots.iter().any(|slot| slot.free_from > index as u32))
            .count() as u32;
        max_live = max_live.max(live);

        match instr.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Chs => {
                out.push(*instr);
                continue;
            }
            Opcode::Flr => {
                tracing::warn!(instr = index, "dropping unimplemented opcode flr");
                continue;
            }
            _ => {}
        }

        let mut patched: [(RegId, Swizzle); 3] =
            array::from_fn(|slot| (instr.op(slot).reg, instr.op(slot).swizzle));

        // Operands first: they resolve through placements made by earlier
        // definitions.
        for slot in 0..instr.opcode().operand_arity() {
            let op = instr.op(slot);
            if op.bank != Bank::Temp {
                continue;
            }
            let name0 = op.reg as usize;
            let read: [bool; LANE_COUNT] =
                array::from_fn(|lane| usage[name0].used_by_op[slot][lane].get(index));
            let Some(first) = (0..LANE_COUNT).find(|&lane| read[lane]) else {
                continue;
            };

            let name = match usage[name0].master {
                0 => name0,
                master => master as usize,
            };
            let alloc = &usage[name].alloc;

            match alloc[first] {
                Some((reg, _)) => {
                    let lanes = op.swizzle.lanes();
                    let translated: [Lane; LANE_COUNT] = array::from_fn(|position| {
                        let lane = lanes[position];
                        if read[lane] {
                            alloc[lane].expect("read lane placed").1
                        } else {
                            lane
                        }
                    });
                    patched[slot] = (reg, Swizzle::from_lanes(translated));
                }
                None => {
                    // The first consumed lane was never created. That is
                    // legal only for a value that exists without a writer
                    // (the slt/sge constant idiom); reference any placed
                    // lane, or leave the operand alone if there is none.
                    if let Some(&(reg, _)) = alloc.iter().flatten().next() {
                        patched[slot] = (reg, op.swizzle);
                    }
                }
            }
        }

        let mut res_reg = instr.dest().reg;
        let mut res_mask = instr.dest().mask;

        if instr.writes_result()
            && instr.dest().bank == Bank::Temp
            && !instr.dest().mask.is_empty()
        {
            let name0 = instr.dest().reg as usize;
            let written = instr.dest().mask.written_lanes();

            // Copies always resolve to their cluster master so the whole
            // cluster shares one placement.
            let name = match usage[name0].master {
                0 => name0,
                master => master as usize,
            };
            if usage[name].max_packed > 1 {
                allocate_packed(&mut usage, &mut mapping, name, index)?;
            } else {
                allocate_unpacked(&mut usage, &mut mapping, name, &written)?;
            }

            let alloc = &usage[name].alloc;
            res_reg = alloc[written[0]].expect("written lane placed").0;

            let mut mapped = [false; LANE_COUNT];
            let mut moved = false;
            for &lane in &written {
                let reg_lane = alloc[lane].expect("written lane placed").1;
                mapped[reg_lane] = true;
                moved |= reg_lane != lane;
            }
            res_mask = WriteMask::from_lanes(mapped);

            if moved && instr.opcode().is_vector_op() {
                // Line the operand swizzles up with the moved destination
                // lanes; a single-lane result reads as a broadcast.
                for (_, swizzle) in patched.iter_mut() {
                    let lanes = swizzle.lanes();
                    *swizzle = if written.len() == 1 {
                        Swizzle::broadcast(lanes[written[0]])
                    } else {
                        let mut translated = [0; LANE_COUNT];
                        for &lane in &written {
                            translated[alloc[lane].expect("written lane placed").1] = lanes[lane];
                        }
                        Swizzle::from_lanes(translated)
                    };
                }
            } else if moved && instr.opcode().has_simd4_result() {
                return Err(OptError::Simd4DestinationPermuted { instr: index });
            }
        }

        out.push(instr.with_regs_and_swizzles(res_reg, res_mask, patched));
    }

    Ok((out, max_live))
}
