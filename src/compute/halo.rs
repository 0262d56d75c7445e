//! Halo plane exchange between adjacent chunks and free-surface mirrors
//! at the six domain faces.
//!
//! Adjacent chunk storages overlap by two Z planes. After an exchange the
//! shared planes hold identical data on both sides:
//! `a[:,:,depth_a-1] == b[:,:,1]` and `b[:,:,0] == a[:,:,depth_a-2]`.

use crate::schema::voxel_index;

use super::chunk::ChunkFields;

/// Copy the two shared planes of one field between neighbors. `a` is the
/// chunk above (lower Z), `b` the one below.
fn exchange_field(a: &mut [f32], b: &mut [f32], depth_a: usize, plane: usize) {
    let a_last = (depth_a - 1) * plane;
    let a_inner = (depth_a - 2) * plane;
    a[a_last..a_last + plane].copy_from_slice(&b[plane..2 * plane]);
    b[..plane].copy_from_slice(&a[a_inner..a_inner + plane]);
}

/// Exchange the velocity components (run before a stress pass).
pub fn exchange_velocity_halos(
    a: &mut ChunkFields,
    b: &mut ChunkFields,
    depth_a: usize,
    plane: usize,
) {
    exchange_field(&mut a.vx, &mut b.vx, depth_a, plane);
    exchange_field(&mut a.vy, &mut b.vy, depth_a, plane);
    exchange_field(&mut a.vz, &mut b.vz, depth_a, plane);
}

/// Exchange the six stress components (run before a velocity pass).
pub fn exchange_stress_halos(
    a: &mut ChunkFields,
    b: &mut ChunkFields,
    depth_a: usize,
    plane: usize,
) {
    exchange_field(&mut a.sxx, &mut b.sxx, depth_a, plane);
    exchange_field(&mut a.syy, &mut b.syy, depth_a, plane);
    exchange_field(&mut a.szz, &mut b.szz, depth_a, plane);
    exchange_field(&mut a.sxy, &mut b.sxy, depth_a, plane);
    exchange_field(&mut a.sxz, &mut b.sxz, depth_a, plane);
    exchange_field(&mut a.syz, &mut b.syz, depth_a, plane);
}

fn mirror_x(field: &mut [f32], width: usize, height: usize, depth: usize) {
    for z in 0..depth {
        for y in 0..height {
            field[voxel_index(0, y, z, width, height)] =
                field[voxel_index(1, y, z, width, height)];
            field[voxel_index(width - 1, y, z, width, height)] =
                field[voxel_index(width - 2, y, z, width, height)];
        }
    }
}

fn mirror_y(field: &mut [f32], width: usize, height: usize, depth: usize) {
    for z in 0..depth {
        let base_low = voxel_index(0, 0, z, width, height);
        let base_one = voxel_index(0, 1, z, width, height);
        let base_high = voxel_index(0, height - 1, z, width, height);
        let base_inner = voxel_index(0, height - 2, z, width, height);
        field.copy_within(base_one..base_one + width, base_low);
        field.copy_within(base_inner..base_inner + width, base_high);
    }
}

fn mirror_z_low(field: &mut [f32], plane: usize) {
    field.copy_within(plane..2 * plane, 0);
}

fn mirror_z_high(field: &mut [f32], depth: usize, plane: usize) {
    let inner = (depth - 2) * plane;
    field.copy_within(inner..inner + plane, inner + plane);
}

/// Mirror the normal velocity component at each face before a stress pass.
/// Z faces are only touched on the first/last chunk of the volume.
pub fn apply_velocity_boundaries(
    fields: &mut ChunkFields,
    width: usize,
    height: usize,
    depth: usize,
    is_first: bool,
    is_last: bool,
) {
    mirror_x(&mut fields.vx, width, height, depth);
    mirror_y(&mut fields.vy, width, height, depth);
    let plane = width * height;
    if is_first {
        mirror_z_low(&mut fields.vz, plane);
    }
    if is_last {
        mirror_z_high(&mut fields.vz, depth, plane);
    }
}

/// Mirror the stress components carrying each face normal before a
/// velocity pass.
pub fn apply_stress_boundaries(
    fields: &mut ChunkFields,
    width: usize,
    height: usize,
    depth: usize,
    is_first: bool,
    is_last: bool,
) {
    mirror_x(&mut fields.sxx, width, height, depth);
    mirror_x(&mut fields.sxy, width, height, depth);
    mirror_x(&mut fields.sxz, width, height, depth);
    mirror_y(&mut fields.syy, width, height, depth);
    mirror_y(&mut fields.sxy, width, height, depth);
    mirror_y(&mut fields.syz, width, height, depth);
    let plane = width * height;
    if is_first {
        mirror_z_low(&mut fields.szz, plane);
        mirror_z_low(&mut fields.sxz, plane);
        mirror_z_low(&mut fields.syz, plane);
    }
    if is_last {
        mirror_z_high(&mut fields.szz, depth, plane);
        mirror_z_high(&mut fields.sxz, depth, plane);
        mirror_z_high(&mut fields.syz, depth, plane);
    }
}
