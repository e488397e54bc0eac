//! M.Video product page layout

use crate::traits::{Locator, SiteProfile, SiteSelectors};

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];
const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-original"];

/// Site profile for mvideo.ru, sending products under `source_name`.
pub fn profile(source_name: &str) -> SiteProfile {
    let images = IMAGE_ATTRS
        .iter()
        .flat_map(|attr| {
            IMAGE_EXTENSIONS
                .iter()
                .map(move |ext| format!("img[{attr}*='{ext}']"))
        })
        .collect();

    SiteProfile {
        name: source_name.to_string(),
        base_url: "https://www.mvideo.ru".to_string(),
        spec_path: "/specification".to_string(),
        not_found_markers: vec!["404".to_string(), "страница не найдена".to_string()],
        access_denied_markers: vec!["доступ запрещен".to_string(), "access denied".to_string()],
        selectors: SiteSelectors {
            title: vec![
                Locator::text("h1.title"),
                Locator::text("h1.pdp-header__title"),
                Locator::text("h1[class*='title']"),
                Locator::text("h1.product-title"),
            ],
            product_code: vec![
                Locator::text(".product-code-container span:last-child"),
                Locator::text(".product-code"),
                Locator::text_or_attr("[data-product-code]", "data-product-code"),
            ],
            gallery: vec![
                Locator::presence(".wrapper.mv-hide-scrollbar"),
                Locator::presence(".product-gallery"),
                Locator::presence(".product-images"),
                Locator::presence(".pdp-gallery"),
                Locator::presence("[data-gallery]"),
            ],
            images,
            image_attrs: IMAGE_ATTRS.iter().map(ToString::to_string).collect(),
            spec_group: "section.characteristics__group".to_string(),
            spec_group_title: vec![
                Locator::text("h2.characteristics__group-title"),
                Locator::text("h2[class*='group-title']"),
                Locator::text("h2"),
            ],
            spec_item: vec![
                Locator::presence("dl.characteristics__list > mvid-item-with-dots"),
                Locator::presence("dl.characteristics__list > div"),
            ],
            spec_name: vec![
                Locator::text("dt.item-with-dots__title span.item-with-dots__text"),
                Locator::text("dt.characteristics__name"),
                Locator::text("dt[class*='title']"),
                Locator::text("dt[class*='name']"),
            ],
            spec_value: vec![
                Locator::text("dd.item-with-dots__value"),
                Locator::text("dd.characteristics__value"),
                Locator::text("dd[class*='value']"),
            ],
        },
    }
}
