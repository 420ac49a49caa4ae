//! Pure upload-chunk planner for kernel uploads (§4.6.6). Deterministic and device-agnostic:
//! the caller supplies `chunk_size = device.max_send_size() - 12` and gets back the exact
//! send order and `execute_on_receive` assignment the wire protocol requires.

/// One planned kernel-upload chunk, in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub offset: usize,
    pub length: usize,
    pub execute_on_receive: bool,
}

/// Plans the chunk sequence for a `payload_len`-byte upload using `chunk_size`-byte chunks.
///
/// Send order: the remainder chunk (if any) first, then every full-size chunk from the
/// highest address down to the lowest. Exactly one chunk carries `execute_on_receive = true` —
/// offset 0 if there is more than one chunk, otherwise the sole remainder chunk. Returns an
/// empty plan for `payload_len == 0` (callers reject that case before planning — §4.6.6 step 2).
pub fn plan_upload_chunks(payload_len: usize, chunk_size: usize) -> Vec<ChunkPlan> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    if payload_len == 0 {
        return Vec::new();
    }

    let n = payload_len / chunk_size;
    let r = payload_len % chunk_size;
    let mut plan = Vec::with_capacity(n + 1);

    if r > 0 {
        plan.push(ChunkPlan {
            offset: n * chunk_size,
            length: r,
            execute_on_receive: r == payload_len,
        });
    }

    for i in (1..=n).rev() {
        let offset = (i - 1) * chunk_size;
        plan.push(ChunkPlan {
            offset,
            length: chunk_size,
            execute_on_receive: offset == 0,
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_plans_nothing() {
        assert_eq!(plan_upload_chunks(0, 64), Vec::new());
    }

    #[test]
    fn payload_smaller_than_chunk_is_one_executing_chunk() {
        let plan = plan_upload_chunks(10, 64);
        assert_eq!(
            plan,
            vec![ChunkPlan { offset: 0, length: 10, execute_on_receive: true }]
        );
    }

    #[test]
    fn exact_multiple_skips_the_remainder_send() {
        let plan = plan_upload_chunks(128, 64);
        assert_eq!(
            plan,
            vec![
                ChunkPlan { offset: 64, length: 64, execute_on_receive: false },
                ChunkPlan { offset: 0, length: 64, execute_on_receive: true },
            ]
        );
    }

    #[test]
    fn literal_400_byte_payload_scenario() {
        let plan = plan_upload_chunks(400, 64);
        let offsets: Vec<usize> = plan.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![384, 320, 256, 192, 128, 64, 0]);
        assert_eq!(plan[0].length, 16);
        let executing: Vec<usize> = plan
            .iter()
            .enumerate()
            .filter(|(_, c)| c.execute_on_receive)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(executing, vec![6]);
        assert_eq!(plan[6].offset, 0);
    }

    #[test]
    fn covers_every_byte_exactly_once_for_many_shapes() {
        for payload_len in [1usize, 63, 64, 65, 127, 128, 129, 1000, 4096] {
            for chunk_size in [16usize, 64, 76 - 12, 200] {
                let plan = plan_upload_chunks(payload_len, chunk_size);
                let mut covered = vec![false; payload_len];
                for chunk in &plan {
                    for b in covered.iter_mut().skip(chunk.offset).take(chunk.length) {
                        assert!(!*b, "byte covered twice");
                        *b = true;
                    }
                    assert!(chunk.length <= chunk_size);
                }
                assert!(covered.iter().all(|&b| b), "not every byte covered");
                let executing = plan.iter().filter(|c| c.execute_on_receive).count();
                assert_eq!(executing, 1, "exactly one chunk must execute on receive");
            }
        }
    }
}
