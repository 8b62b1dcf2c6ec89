//! Listing images under the reserved namespace

use anyhow::Result;

use crate::runtime::{CommandRunner, ImageListing, Runtime};
use crate::IMAGE_NAMESPACE;

/// Print the table of all images in the reserved namespace.
pub fn print_images<R: CommandRunner>(runtime: &Runtime<R>) -> Result<()> {
    let images = runtime.list_managed_images()?;
    print!("{}", render_table(&images));
    Ok(())
}

fn render_table(images: &[ImageListing]) -> String {
    let rule = "-".repeat(70);
    let mut lines = vec![
        String::new(),
        format!("All {IMAGE_NAMESPACE} images:"),
        rule.clone(),
        format!(" {:<50} | {:<12}", "Tag", "Image ID"),
        rule.clone(),
    ];
    if images.is_empty() {
        lines.push(" (no images found)".to_string());
    } else {
        for image in images {
            lines.push(format!(" {:<50} | {:<12}", image.tag, image.id));
        }
    }
    lines.push(rule);
    // Trailing newline
    lines.push(String::new());
    lines.join("\n")
}
