use crate::sampler::ProductSample;

/// Renders the text prompt for a category hero image.
///
/// Pure: the same sample and category name always yield the same string. An
/// empty sample renders an empty product list; whether that is acceptable is
/// decided by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(&self, sample: &ProductSample, category_name: &str) -> String {
        let product_list = sample.names().join(", ");
        let category = category_name.trim();
        let subject = if category.is_empty() {
            "an e-commerce category page".to_string()
        } else {
            format!("the \"{category}\" e-commerce category page")
        };

        format!(
            "Create a professional, high-quality hero image for {subject}. \
             Use the provided product images as reference and incorporate them into the design. \
             The products shown are: {product_list}. \
             The image should be visually appealing, with a clean layout, and suitable for an e-commerce website. \
             Use a style that highlights the products in an artistic way. \
             DO NOT ADD ANY TEXT OR LABELS."
        )
    }
}
