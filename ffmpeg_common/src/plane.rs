/// Copies `rows` rows of `row_len` bytes between two image planes with
/// different line strides. Rows beyond either buffer are left alone, so a
/// smaller destination crops the source.
pub(crate) fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_len: usize,
    rows: usize,
) {
    for (src_row, dst_row) in src
        .chunks(src_stride)
        .zip(dst.chunks_mut(dst_stride))
        .take(rows)
    {
        let n = row_len.min(src_row.len()).min(dst_row.len());
        dst_row[..n].copy_from_slice(&src_row[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_padding() {
        // 2x2 rgb24 with 8 byte lines
        let src = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let mut dst = [0u8; 12];
        copy_plane(&src, 8, &mut dst, 6, 6, 2);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn crops_last_column_and_row() {
        // 3x3 single byte pixels into 2x2
        let src = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut dst = [0u8; 4];
        copy_plane(&src, 3, &mut dst, 2, 2, 2);
        assert_eq!(dst, [1, 2, 4, 5]);
    }
}
