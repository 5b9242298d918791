use log::debug;

use super::collect_info::NVN_BUFFER_STRIDE;
use crate::ir::{Program, StorageBufferDescriptor, Type, NUM_NVN_BUFFERS};

/// Add storage buffers for the driver region slots read by the program.
///
/// Accesses through these pointers were not resolved to storage buffers,
/// so the buffers are conservatively marked as written.
pub fn add_nvn_storage_buffers(program: &mut Program) {
    let info = &mut program.info;
    if info.nvn_buffer_used == 0 {
        return;
    }
    for slot in 0..NUM_NVN_BUFFERS as u32 {
        if info.nvn_buffer_used & (1 << slot) == 0 {
            continue;
        }
        let cbuf_offset = info.nvn_buffer_base + slot * NVN_BUFFER_STRIDE;
        if info
            .storage_buffers_descriptors
            .iter()
            .any(|d| d.cbuf_index == 0 && d.cbuf_offset == cbuf_offset)
        {
            continue;
        }
        debug!("Add driver storage buffer at cbuf 0 offset {cbuf_offset:#x}");
        info.storage_buffers_descriptors.push(StorageBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset,
            count: 1,
            is_written: true,
        });
    }
    info.used_storage_buffer_types |= Type::U32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_unresolved_slots() {
        let mut program = Program::new(Stage::Fragment);
        program.info.nvn_buffer_base = 0x510;
        program.info.nvn_buffer_used = 0b1001;
        program
            .info
            .storage_buffers_descriptors
            .push(StorageBufferDescriptor {
                cbuf_index: 0,
                cbuf_offset: 0x510,
                count: 1,
                is_written: false,
            });

        add_nvn_storage_buffers(&mut program);

        assert_eq!(
            vec![
                StorageBufferDescriptor {
                    cbuf_index: 0,
                    cbuf_offset: 0x510,
                    count: 1,
                    is_written: false
                },
                StorageBufferDescriptor {
                    cbuf_index: 0,
                    cbuf_offset: 0x540,
                    count: 1,
                    is_written: true
                }
            ],
            program.info.storage_buffers_descriptors
        );
    }

    #[test]
    fn no_slots_used() {
        let mut program = Program::new(Stage::Compute);
        add_nvn_storage_buffers(&mut program);
        assert!(program.info.storage_buffers_descriptors.is_empty());
        assert_eq!(Type::VOID, program.info.used_storage_buffer_types);
    }
}
