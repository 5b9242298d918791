use mxw_lib::header::{PixelImap, NUM_GENERICS};

use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::{Interpolation, Program};

fn interpolation(map: PixelImap) -> Option<Interpolation> {
    match map {
        PixelImap::Unused => None,
        PixelImap::Perspective => Some(Interpolation::Smooth),
        PixelImap::ScreenLinear => Some(Interpolation::NoPerspective),
        PixelImap::Constant => Some(Interpolation::Flat),
    }
}

/// Set the interpolation mode of each generic fragment input from the pixel input map.
pub fn collect_interpolation_info(
    env: &mut dyn Environment,
    program: &mut Program,
) -> Result<(), CompileError> {
    let ps = env
        .sph()
        .ps()
        .map_err(|e| CompileError::Runtime(format!("Failed to read pixel shader header: {e}")))?;

    for index in 0..NUM_GENERICS {
        if let Some(mode) = interpolation(ps.generic_input_map(index)) {
            program.info.input_generics[index].interpolation = mode;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::test_environment;
    use mxw_lib::header::ProgramHeader;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn generic_interpolation_modes() {
        let mut bytes = [0u8; 0x50];
        // Generic 0 perspective, generic 1 screen linear, generic 2 constant in y only.
        bytes[0x18] = 0b10;
        bytes[0x19] = 0b11;
        bytes[0x1a] = 0b0100;
        let sph = ProgramHeader::from_bytes(&bytes).unwrap();
        let mut env = test_environment(Stage::Fragment, sph, &[]);

        let mut program = Program::new(Stage::Fragment);
        program.info.input_generics[3].interpolation = Interpolation::Flat;
        collect_interpolation_info(&mut env, &mut program).unwrap();

        let modes: Vec<_> = program.info.input_generics[..4]
            .iter()
            .map(|g| g.interpolation)
            .collect();
        assert_eq!(
            vec![
                Interpolation::Smooth,
                Interpolation::NoPerspective,
                Interpolation::Flat,
                Interpolation::Flat
            ],
            modes
        );
    }
}
