//! Dynamic rendering attachments.

use ash::vk;

use super::pipeline::full_scissor;

/// Color attachment, cleared to `clear` or loaded when `None`. Always stored.
pub fn color_attachment(view: vk::ImageView, clear: Option<[f32; 4]>) -> vk::RenderingAttachmentInfo<'static> {
    let load_op = if clear.is_some() {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    };
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear.unwrap_or_default(),
            },
        })
}

/// Depth attachment, cleared to `clear` or loaded when `None`. Always stored.
pub fn depth_attachment(view: vk::ImageView, clear: Option<f32>) -> vk::RenderingAttachmentInfo<'static> {
    let load_op = if clear.is_some() {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    };
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: clear.unwrap_or(1.0),
                stencil: 0,
            },
        })
}

/// Begin a dynamic rendering scope over the whole of `extent`.
pub unsafe fn begin_rendering(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
    colors: &[vk::RenderingAttachmentInfo],
    depth: Option<&vk::RenderingAttachmentInfo>,
) {
    let mut info = vk::RenderingInfo::default()
        .render_area(full_scissor(extent))
        .layer_count(1)
        .color_attachments(colors);
    if let Some(depth) = depth {
        info = info.depth_attachment(depth);
    }
    device.cmd_begin_rendering(cmd, &info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_or_load() {
        let cleared = color_attachment(vk::ImageView::null(), Some([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(cleared.load_op, vk::AttachmentLoadOp::CLEAR);
        let loaded = depth_attachment(vk::ImageView::null(), None);
        assert_eq!(loaded.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(loaded.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(loaded.store_op, vk::AttachmentStoreOp::STORE);
    }
}
