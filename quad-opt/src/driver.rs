//! Pass orchestration.

use quad_asm::{
    decode_program, encode_program, requires_early_z_disable, Instruction, Opcode, Program,
};

use crate::attributes::attributes_to_loads;
use crate::dce::dead_code_elimination;
use crate::error::OptError;
use crate::liverange::reduce_live_registers;
use crate::movs::remove_redundant_movs;
use crate::params::ArchParams;
use crate::rename::rename_registers;
use crate::scalarize::simd4_to_scalar;
use crate::waitpoints::assign_wait_points;

fn trace_program(pass: &str, program: &[Instruction]) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        for (index, instr) in program.iter().enumerate() {
            tracing::debug!(pass, "{:04x}: {instr}", index * Instruction::SIZE);
        }
    }
}

/// Run the optimization pipeline over a program.
///
/// Passes run in a fixed order: rename (unless disabled), dead-code
/// elimination to a fixpoint, live-range reduction, redundant-copy removal,
/// then dead-code elimination to a fixpoint again. Returns the optimized
/// program and the maximum number of live temporaries (0 when renaming, and
/// with it allocation, is disabled).
pub fn optimize(
    program: &[Instruction],
    params: &ArchParams,
    no_rename: bool,
    scalar_mode: bool,
) -> Result<(Program, u32), OptError> {
    let mut current: Program = program.to_vec();
    let mut names_used = params.temp_registers as u32;
    let mut max_live = 0;

    if !no_rename {
        let (renamed, names) = rename_registers(&current, params, scalar_mode)?;
        current = renamed;
        names_used = names;
        trace_program("rename", &current);
    }

    loop {
        let (next, changed) = dead_code_elimination(&current, names_used);
        current = next;
        if !changed {
            break;
        }
        trace_program("dce", &current);
    }

    if !no_rename {
        let (reduced, live) = reduce_live_registers(&current, params, names_used)?;
        current = reduced;
        max_live = live;
        trace_program("reduce-live-registers", &current);
        tracing::debug!(max_live, "live register reduction");
    }

    current = remove_redundant_movs(&current);
    trace_program("remove-redundant-movs", &current);

    loop {
        let (next, changed) = dead_code_elimination(&current, names_used);
        current = next;
        if !changed {
            break;
        }
        trace_program("dce", &current);
    }

    Ok((current, max_live))
}

/// Knobs of the full translation pipeline.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// Rewrite input-attribute reads into explicit loads (vertex programs).
    pub attributes_to_loads: bool,
    /// Lower SIMD4 instructions to scalar form.
    pub scalar_mode: bool,
    /// Run the optimization pipeline. Automatically disabled for programs
    /// with jumps.
    pub optimize: bool,
    /// Annotate the result with wait points.
    pub wait_points: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            attributes_to_loads: false,
            scalar_mode: false,
            optimize: true,
            wait_points: true,
        }
    }
}

/// Result of a full translation.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// The final program.
    pub program: Program,
    /// The final program in binary form.
    pub code: Vec<u8>,
    /// Maximum number of simultaneously live temporaries.
    pub max_live_temps: u32,
    /// ALU instructions per texture/load instruction (0 with no loads).
    pub alu_tex_ratio: f32,
    /// Whether the program forces the early-z optimization off.
    pub disable_early_z: bool,
}

/// Decode, transform, optimize and re-encode a binary shader program.
pub fn transform(
    bytes: &[u8],
    params: &ArchParams,
    options: &TransformOptions,
) -> Result<TransformOutput, OptError> {
    let (mut program, num_temps, has_jumps) = decode_program(bytes)?;
    trace_program("input", &program);

    if has_jumps {
        tracing::warn!("program contains jumps; optimization disabled");
    }
    let optimize_enabled = options.optimize && !has_jumps;

    if options.attributes_to_loads {
        program = attributes_to_loads(&program, params)?;
        trace_program("attributes-to-loads", &program);
    }
    if options.scalar_mode {
        program = simd4_to_scalar(&program, params)?;
        trace_program("simd4-to-scalar", &program);
    }

    let mut max_live_temps = num_temps;
    if optimize_enabled {
        let (optimized, live) = optimize(&program, params, false, options.scalar_mode)?;
        program = optimized;
        max_live_temps = live;
    }

    if options.wait_points {
        program = assign_wait_points(&program, params);
        trace_program("wait-points", &program);
    }

    let code = encode_program(&program)?;
    Ok(TransformOutput {
        alu_tex_ratio: alu_tex_ratio(&program),
        disable_early_z: requires_early_z_disable(&program),
        program,
        code,
        max_live_temps,
    })
}

/// ALU instructions per texture/load instruction; 0 for a program without
/// loads.
pub fn alu_tex_ratio(program: &[Instruction]) -> f32 {
    let mut alu = 0u32;
    let mut tex = 0u32;
    for instr in program {
        let opcode = instr.opcode();
        if opcode.is_load() {
            tex += 1;
        } else if !matches!(
            opcode,
            Opcode::Nop
                | Opcode::End
                | Opcode::Kil
                | Opcode::Kls
                | Opcode::Zxp
                | Opcode::Zxs
                | Opcode::Chs
                | Opcode::Jmp
                | Opcode::Flr
        ) {
            alu += 1;
        }
    }
    if tex > 0 {
        alu as f32 / tex as f32
    } else {
        0.0
    }
}
