//! Camera and view management.

use ash::vk;
use glam::{Mat4, Vec3};
use rtrt_gpu::{BufferBarrier, DeviceContext};

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a camera at `position` looking at `target`.
    pub fn new(position: Vec3, target: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            fov,
            aspect,
            ..Self::default()
        }
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio from a framebuffer size. Zero-sized extents are
    /// ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Rotate the camera around `target` by `yaw` radians about the up axis
    /// and `pitch` radians about the camera's right axis. Pitch is clamped so
    /// the camera never crosses the poles.
    pub fn orbit(&mut self, target: Vec3, yaw: f32, pitch: f32) {
        let offset = self.position - target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }

        let current_pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
        let limit = std::f32::consts::FRAC_PI_2 - 0.05;
        let new_pitch = (current_pitch + pitch).clamp(-limit, limit);
        let current_yaw = offset.z.atan2(offset.x);
        let new_yaw = current_yaw + yaw;

        let horizontal = radius * new_pitch.cos();
        self.position = target
            + Vec3::new(
                horizontal * new_yaw.cos(),
                radius * new_pitch.sin(),
                horizontal * new_yaw.sin(),
            );
        self.look_at(target);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// Right-handed perspective with depth in `[0, 1]` and Y pointing down in
    /// clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }
}

/// Camera uniform buffer data, read by the scanline vertex shader and the
/// ray generation shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub view_inverse: [[f32; 4]; 4],
    pub proj_inverse: [[f32; 4]; 4],
}

impl CameraUniforms {
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        Self {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            view_inverse: camera.view_matrix().inverse().to_cols_array_2d(),
            proj_inverse: camera.projection_matrix().inverse().to_cols_array_2d(),
        }
    }
}

/// Record an inline update of the camera uniform buffer.
///
/// The previous frame's reads at `reader_stage` are ordered before the
/// transfer write, and the write is made visible to uniform reads at
/// `reader_stage` of this frame.
pub fn record_camera_update(
    device: &dyn DeviceContext,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    uniforms: &CameraUniforms,
    reader_stage: vk::PipelineStageFlags,
) {
    device.cmd_buffer_barrier(
        cmd,
        &BufferBarrier {
            buffer,
            offset: 0,
            size: CameraUniforms::SIZE,
            src_access: vk::AccessFlags::UNIFORM_READ,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: reader_stage,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
    );
    device.cmd_update_buffer(cmd, buffer, 0, bytemuck::bytes_of(uniforms));
    device.cmd_buffer_barrier(
        cmd,
        &BufferBarrier {
            buffer,
            offset: 0,
            size: CameraUniforms::SIZE,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::UNIFORM_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: reader_stage,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;
    use rtrt_gpu::mock::{MockDevice, Recorded};

    #[test]
    fn uniforms_are_three_matrices() {
        assert_eq!(CameraUniforms::SIZE, 192);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 1.0);
        let above = camera.view_projection_matrix() * Vec4::new(0.0, 1.0, -5.0, 1.0);
        // Points above the camera land in the upper half, which is -Y in clip space
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn inverse_matrices_undo_forward_transform() {
        let camera = Camera::new(Vec3::new(3.0, 4.0, 5.0), Vec3::ZERO, 0.9, 1.5);
        let uniforms = camera.uniforms();
        let view_inverse = Mat4::from_cols_array_2d(&uniforms.view_inverse);
        let proj_inverse = Mat4::from_cols_array_2d(&uniforms.proj_inverse);

        let identity = camera.view_matrix() * view_inverse;
        let identity_proj = camera.projection_matrix() * proj_inverse;
        for (a, b) in identity
            .to_cols_array()
            .iter()
            .zip(Mat4::IDENTITY.to_cols_array().iter())
        {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
        for (a, b) in identity_proj
            .to_cols_array()
            .iter()
            .zip(Mat4::IDENTITY.to_cols_array().iter())
        {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn orbit_keeps_distance_and_target() {
        let target = Vec3::new(0.0, 1.0, 0.0);
        let mut camera = Camera::new(Vec3::new(0.0, 3.0, 8.0), target, 1.0, 1.0);
        let radius = (camera.position - target).length();

        camera.orbit(target, 0.3, 0.2);
        assert_relative_eq!((camera.position - target).length(), radius, epsilon = 1e-4);
        let to_target = (target - camera.position).normalize();
        assert_relative_eq!(camera.direction.dot(to_target), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn orbit_pitch_is_clamped() {
        let target = Vec3::ZERO;
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), target, 1.0, 1.0);
        camera.orbit(target, 0.0, 10.0);
        assert!(camera.position.y < 5.0);
        assert!(camera.direction.cross(camera.up).length() > 1e-3);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
        camera.set_viewport(0, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
    }

    #[test]
    fn update_is_fenced_by_barriers() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let buffer = <vk::Buffer as vk::Handle>::from_raw(0xCA);
        let uniforms = Camera::default().uniforms();

        record_camera_update(
            &device,
            cmd,
            buffer,
            &uniforms,
            vk::PipelineStageFlags::VERTEX_SHADER,
        );

        let commands = device.commands_for(cmd);
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            &commands[0],
            Recorded::BufferBarrier { barrier, .. }
                if barrier.dst_access == vk::AccessFlags::TRANSFER_WRITE
                    && barrier.src_stage == vk::PipelineStageFlags::VERTEX_SHADER
        ));
        assert_eq!(
            commands[1],
            Recorded::UpdateBuffer {
                cmd,
                buffer,
                offset: 0,
                data: bytemuck::bytes_of(&uniforms).to_vec(),
            }
        );
        assert!(matches!(
            &commands[2],
            Recorded::BufferBarrier { barrier, .. }
                if barrier.dst_access == vk::AccessFlags::UNIFORM_READ
                    && barrier.dst_stage == vk::PipelineStageFlags::VERTEX_SHADER
        ));
    }
}
