use std::{
    fs,
    path::{Path, PathBuf},
};

/// Writes `<name>.nhdr` and `<name>.raw` into `dir` and returns the header path.
pub fn write_volume(
    dir: &Path,
    name: &str,
    sample_type: &str,
    sizes: (usize, usize, usize),
    spacing: (f32, f32, f32),
    payload: &[u8],
) -> PathBuf {
    let header = format!(
        "NRRD0004\n\
         # synthetic test volume\n\
         type: {sample_type}\n\
         dimension: 3\n\
         sizes: {} {} {}\n\
         spacings: {} {} {}\n\
         endian: little\n\
         encoding: raw\n\
         content: {name}\n\
         data file: {name}.raw\n",
        sizes.0, sizes.1, sizes.2, spacing.0, spacing.1, spacing.2
    );
    let header_path = dir.join(format!("{name}.nhdr"));
    fs::write(&header_path, header).expect("header should be writable");
    fs::write(dir.join(format!("{name}.raw")), payload).expect("payload should be writable");
    header_path
}

/// 8-bit sphere of value `inside` on a background of `outside`.
pub fn sphere_u8(n: usize, radius: f32, inside: u8, outside: u8) -> Vec<u8> {
    let center = (n as f32 - 1.0) / 2.0;
    let mut data = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let d2 = [x, y, z]
                    .iter()
                    .map(|&c| (c as f32 - center).powi(2))
                    .sum::<f32>();
                data.push(if d2 <= radius * radius { inside } else { outside });
            }
        }
    }
    data
}

/// Little-endian 16-bit ramp along x.
pub fn ramp_u16(sizes: (usize, usize, usize), step: u16) -> Vec<u8> {
    let (width, height, depth) = sizes;
    (0..depth * height)
        .flat_map(|_| (0..width).map(move |x| x as u16 * step))
        .flat_map(u16::to_le_bytes)
        .collect()
}
