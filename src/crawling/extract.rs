//! Product extraction from rendered detail pages.
//!
//! Extraction is a pure function over the rendered page snapshot (URL +
//! HTML): no I/O, no browser round-trips. The ASIN is mandatory; without
//! it the record has no identity and the job fails. Every other field is
//! best-effort: product pages come in several layouts (overview table,
//! glance icons, detail bullets, information table) and most fields appear
//! in only some of them, so a missing field is logged at debug and left
//! empty.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::crawling::urls::asin_from_url;
use crate::domain::product::{BestSellerRank, Product};

/// A page as the browser rendered it, snapshotted for extraction.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// Turns a rendered product-detail page into a product record.
pub trait ProductExtractor: Send + Sync {
    fn extract(&self, page: &RenderedPage) -> Result<Product>;
}

static RANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([\d,]+)").expect("valid rank pattern"));

/// Extractor for the Amazon product-detail DOM.
pub struct AmazonExtractor {
    asin_input: Selector,
    reviews_container: Selector,
    reviews_value: Selector,
    ratings_count: Selector,
    title: Selector,
    description: Selector,
    book_description: Selector,
    aplus: Selector,
    about_item: Selector,
    overview_rows: Selector,
    overview_value: Selector,
    glance_rows: Selector,
    glance_value: Selector,
    bullet_spans: Selector,
    bullet_value: Selector,
    bullet_items: Selector,
    prod_details_rows: Selector,
    tech_spec_rows: Selector,
    row_head: Selector,
    row_value: Selector,
    row_cell: Selector,
    choice_badge: Selector,
    climate_section: Selector,
    climate_feature: Selector,
    images: Selector,
    bought_together_links: Selector,
    breadcrumb_links: Selector,
    price_containers: [Selector; 2],
    price_symbol: Selector,
    price_to_pay: Selector,
    price_whole: Selector,
    price_fraction: Selector,
    list_price: Selector,
    color_twister: Selector,
    last_span: Selector,
    seller_link: Selector,
    social_proof: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector {css:?}: {err}"))
}

impl AmazonExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            asin_input: selector("input#ASIN")?,
            reviews_container: selector("div#averageCustomerReviews")?,
            reviews_value: selector("span:first-child a>span")?,
            ratings_count: selector("span#acrCustomerReviewText")?,
            title: selector("span#productTitle")?,
            description: selector("div#productDescription")?,
            book_description: selector("div#bookDescription_feature_div")?,
            aplus: selector("div#aplus")?,
            about_item: selector("div#feature-bullets > ul")?,
            overview_rows: selector("div#productOverview_feature_div tr")?,
            overview_value: selector("td:nth-child(2)")?,
            // the glance section nests a table per stat inside an outer table
            glance_rows: selector("div#glance_icons_div table table tr")?,
            glance_value: selector("td:nth-child(2) > span:last-child")?,
            bullet_spans: selector("div#detailBulletsWrapper_feature_div ul > li > span")?,
            bullet_value: selector("span:last-child")?,
            bullet_items: selector("div#detailBulletsWrapper_feature_div ul > li")?,
            prod_details_rows: selector("div#prodDetails tr")?,
            tech_spec_rows: selector("div#technicalSpecifications_feature_div tr")?,
            row_head: selector("th")?,
            row_value: selector("td:last-child")?,
            row_cell: selector("td")?,
            choice_badge: selector("div#acBadge_feature_div")?,
            climate_section: selector("div#climatePledgeFriendly div.a-spacing-base")?,
            climate_feature: selector("span.a-text-bold")?,
            images: selector("div#imageBlock div#main-image-container>ul img")?,
            bought_together_links: selector("div#similarities_feature_div a")?,
            breadcrumb_links: selector("div#wayfinding-breadcrumbs_feature_div>ul a")?,
            price_containers: [
                selector("div#corePriceDisplay_desktop_feature_div")?,
                selector("div#corePrice_desktop")?,
            ],
            price_symbol: selector(".a-price-symbol")?,
            price_to_pay: selector(".priceToPay")?,
            price_whole: selector(".a-price-whole")?,
            price_fraction: selector(".a-price-fraction")?,
            list_price: selector(".a-text-price .a-offscreen")?,
            color_twister: selector("div#inline-twister-dim-title-color_name")?,
            last_span: selector("span:last-child")?,
            seller_link: selector("a#sellerProfileTriggerId")?,
            social_proof: selector("span#social-proofing-faceout-title-tk_bought")?,
        })
    }

    fn find_asin(&self, doc: &Html, url: &str) -> Option<String> {
        if let Some(asin) = asin_from_url(url) {
            return Some(asin);
        }

        if let Some(value) = doc
            .select(&self.asin_input)
            .next()
            .and_then(|el| el.value().attr("value"))
            .filter(|v| !v.is_empty())
        {
            return Some(value.to_string());
        }

        if let Some(value) = doc
            .select(&self.reviews_container)
            .next()
            .and_then(|el| el.value().attr("data-asin"))
            .filter(|v| !v.is_empty())
        {
            return Some(value.to_string());
        }

        self.find_stat(doc, &["ASIN"])
    }

    fn find_title(&self, doc: &Html) -> Option<String> {
        first_text(doc, &self.title)
    }

    fn find_description(&self, doc: &Html) -> Option<String> {
        if let Some(el) = doc.select(&self.description).next() {
            // visible text only; some descriptions embed <script> blocks
            let text = visible_text(el);
            if !text.is_empty() {
                return Some(strip_label(&text, "Product Description"));
            }
        }

        if let Some(text) = first_text(doc, &self.book_description) {
            return Some(text);
        }

        // A+ content pages put the description in a media-rich section.
        for el in doc.select(&self.aplus) {
            let text = visible_text(el);
            if text.contains("Product Description") {
                return Some(strip_label(&text, "Product Description"));
            }
        }

        None
    }

    /// Looks a labelled product stat up in the four places Amazon renders
    /// them: the overview table, the glance-icons section, the detail bullet
    /// list and the product-information table.
    fn find_stat(&self, doc: &Html, names: &[&str]) -> Option<String> {
        for name in names {
            if let Some(value) = self.stat_from_overview(doc, name) {
                return Some(value);
            }
            if let Some(value) = self.stat_from_glance_icons(doc, name) {
                return Some(value);
            }
            if let Some(value) = self.stat_from_bullet_list(doc, name) {
                return Some(value);
            }
            if let Some(value) = self.stat_from_info_table(doc, name) {
                return Some(value);
            }
        }
        None
    }

    fn stat_from_overview(&self, doc: &Html, name: &str) -> Option<String> {
        let row = doc
            .select(&self.overview_rows)
            .find(|row| text_of(*row).contains(name))?;
        element_text(row, &self.overview_value)
    }

    fn stat_from_glance_icons(&self, doc: &Html, name: &str) -> Option<String> {
        let row = doc
            .select(&self.glance_rows)
            .find(|row| text_of(*row).contains(name))?;
        element_text(row, &self.glance_value)
    }

    fn stat_from_bullet_list(&self, doc: &Html, name: &str) -> Option<String> {
        let item = doc
            .select(&self.bullet_spans)
            .find(|span| text_of(*span).contains(name))?;
        element_text(item, &self.bullet_value)
    }

    fn stat_from_info_table(&self, doc: &Html, name: &str) -> Option<String> {
        for rows in [&self.prod_details_rows, &self.tech_spec_rows] {
            for row in doc.select(rows) {
                // the head must match exactly: "Manufacturer" must not hit
                // the "Manufacturer recommended age" row
                let head = row.select(&self.row_head).next().map(text_of);
                if head.is_some_and(|head| head.eq_ignore_ascii_case(name)) {
                    if let Some(value) = element_text(row, &self.row_value) {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    fn find_color(&self, doc: &Html) -> Option<String> {
        if let Some(color) = self.find_stat(doc, &["Color"]) {
            return Some(color);
        }
        let container = doc.select(&self.color_twister).next()?;
        element_text(container, &self.last_span)
    }

    fn find_average_rating(&self, doc: &Html) -> Option<f32> {
        let container = doc.select(&self.reviews_container).next()?;
        let text = element_text(container, &self.reviews_value)?;
        text.trim().parse().ok()
    }

    fn find_ratings_count(&self, doc: &Html) -> Option<i64> {
        // rendered as e.g. "3,421 ratings"
        let text = first_text(doc, &self.ratings_count)?;
        let mut parts = text.split_whitespace();
        let amount = parts.next()?;
        if parts.count() != 1 {
            debug!("{text:?} is an invalid rating text");
            return None;
        }
        parse_count(amount).ok()
    }

    fn find_sustainability_features(&self, doc: &Html) -> Vec<String> {
        let Some(section) = doc.select(&self.climate_section).next() else {
            return Vec::new();
        };
        section
            .select(&self.climate_feature)
            .map(text_of)
            .filter(|text| !text.is_empty())
            .collect()
    }

    fn find_images(&self, doc: &Html) -> Vec<String> {
        doc.select(&self.images)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn find_bought_together(&self, doc: &Html) -> Vec<String> {
        let mut asins = Vec::new();
        for link in doc.select(&self.bought_together_links) {
            if let Some(asin) = link.value().attr("href").and_then(asin_from_url) {
                if !asins.contains(&asin) {
                    asins.push(asin);
                }
            }
        }
        asins
    }

    fn find_categories(&self, doc: &Html) -> Vec<String> {
        doc.select(&self.breadcrumb_links)
            .map(text_of)
            .filter(|text| !text.is_empty())
            .collect()
    }

    fn find_best_sellers(&self, doc: &Html) -> Vec<BestSellerRank> {
        const LABEL: &str = "Best Sellers Rank";

        // whole rank list as one text blob, from the information table first
        let mut raw_ranks = String::new();
        'tables: for rows in [&self.prod_details_rows, &self.tech_spec_rows] {
            for row in doc.select(rows) {
                if text_of(row).contains(LABEL) {
                    if let Some(text) = element_text(row, &self.row_cell) {
                        raw_ranks = text;
                        break 'tables;
                    }
                }
            }
        }

        // then from the detail bullet list, where the label and every rank
        // share one list item
        if raw_ranks.is_empty() {
            for item in doc.select(&self.bullet_items) {
                let text = text_of(item);
                if text.contains(LABEL) {
                    if let Some((_, value)) = text.split_once(':') {
                        raw_ranks = value.to_string();
                    }
                    break;
                }
            }
        }

        raw_ranks
            .split('#')
            .filter_map(|part| parse_best_seller(&format!("#{part}")))
            .collect()
    }

    fn find_price(&self, doc: &Html) -> (f32, f32, String) {
        let container = self
            .price_containers
            .iter()
            .find_map(|sel| doc.select(sel).next());
        let Some(container) = container else {
            return (0.0, 0.0, String::new());
        };

        let currency = element_text(container, &self.price_symbol).unwrap_or_default();

        let mut discounted = 0.0;
        if let Some(to_pay) = container.select(&self.price_to_pay).next() {
            let mut whole = element_text(to_pay, &self.price_whole).unwrap_or_default();
            let fraction = element_text(to_pay, &self.price_fraction).unwrap_or_default();
            if !whole.is_empty() {
                // the whole part usually already ends with the decimal point
                if !whole.ends_with('.') {
                    whole.push('.');
                }
                if let Ok(value) = format!("{whole}{fraction}").trim().parse() {
                    discounted = value;
                }
            }
        }

        let mut list = 0.0;
        if let Some(el) = container.select(&self.list_price).next() {
            let text = text_of(el);
            let text = text.strip_prefix(&currency).unwrap_or(&text);
            if let Ok(value) = text.trim().parse() {
                list = value;
            }
        }

        (list, discounted, currency)
    }

    fn find_seller_id(&self, doc: &Html) -> Option<String> {
        let href = doc
            .select(&self.seller_link)
            .next()
            .and_then(|link| link.value().attr("href"))
            .filter(|href| !href.is_empty())?;

        let full = format!("https://www.amazon.com{href}");
        let parsed = url::Url::parse(&full).ok()?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == "seller")
            .map(|(_, value)| value.into_owned())
            .filter(|seller| !seller.is_empty())
    }

    fn find_first_available(&self, doc: &Html) -> Option<NaiveDate> {
        let date = self.find_stat(
            doc,
            &["Date First Available", "Publication date", "Release date"],
        )?;
        NaiveDate::parse_from_str(date.trim(), "%B %d, %Y").ok()
    }

    fn find_bought_past_month(&self, doc: &Html) -> Option<i64> {
        // e.g. "400+ bought in past month"; the amount is the first word
        let text = first_text(doc, &self.social_proof)?;
        let amount = text.split_whitespace().next()?.replacen('+', "", 1);
        parse_count(&amount).ok()
    }
}

impl ProductExtractor for AmazonExtractor {
    fn extract(&self, page: &RenderedPage) -> Result<Product> {
        let doc = Html::parse_document(&page.html);

        let asin = self
            .find_asin(&doc, &page.url)
            .context("asin not found")?;

        let mut product = Product {
            asin,
            ..Default::default()
        };

        macro_rules! field {
            ($target:expr, $value:expr, $name:literal) => {
                match $value {
                    Some(value) => $target = value,
                    None => debug!(asin = %product.asin, "{} not found", $name),
                }
            };
        }

        field!(product.title, self.find_title(&doc), "title");
        field!(product.description, self.find_description(&doc), "description");
        field!(product.about_item, first_text(&doc, &self.about_item), "about item");
        field!(product.brand, self.find_stat(&doc, &["Brand"]), "brand");
        field!(
            product.manufacturer,
            self.find_stat(&doc, &["Manufacturer"]),
            "manufacturer"
        );
        field!(
            product.age_range,
            self.find_stat(&doc, &["Age Range", "Manufacturer recommended age", "Reading age"]),
            "age range"
        );
        field!(product.color, self.find_color(&doc), "color");
        field!(
            product.material,
            self.find_stat(&doc, &["Material", "Material Type", "Fabric type"]),
            "material"
        );
        field!(
            product.weight,
            self.find_stat(&doc, &["Item Weight", "Weight"]),
            "weight"
        );
        field!(
            product.dimensions,
            self.find_stat(&doc, &["Product Dimensions", "Dimensions"]),
            "dimensions"
        );
        field!(
            product.origin,
            self.find_stat(&doc, &["Country/Region of origin", "Country of Origin"]),
            "origin"
        );
        field!(
            product.average_rating,
            self.find_average_rating(&doc),
            "average rating"
        );
        field!(product.ratings, self.find_ratings_count(&doc), "review amount");
        field!(product.seller_id, self.find_seller_id(&doc), "seller id");
        field!(
            product.bought_past_month,
            self.find_bought_past_month(&doc),
            "bought past month"
        );

        product.is_amazon_choice = doc.select(&self.choice_badge).next().is_some();
        product.sustainability_features = self.find_sustainability_features(&doc);
        product.images = self.find_images(&doc);
        product.bought_together_asins = self.find_bought_together(&doc);
        product.categories = self.find_categories(&doc);
        product.best_sellers = self.find_best_sellers(&doc);
        product.first_available_at = self.find_first_available(&doc);

        let (list, discounted, currency) = self.find_price(&doc);
        product.list_price = list;
        product.discounted_price = discounted;
        product.currency = currency;

        debug!(asin = %product.asin, "finished parsing product fields");
        Ok(product)
    }
}

/// Parses rank-and-category fragments in both rendered variants:
/// `#199 in Office Products (See Top 100 in Office Products)` and
/// `#3 in Office Laminating Supplies`.
fn parse_best_seller(text: &str) -> Option<BestSellerRank> {
    let rank_match = RANK_RE.captures(text)?.get(1)?;
    let rank = parse_count(rank_match.as_str()).ok()?;

    let in_idx = text.find("in")?;
    let after_in = &text[in_idx + 2..];
    let category = match after_in.find('(') {
        Some(paren) => after_in[..paren].trim(),
        None => after_in.trim(),
    };

    Some(BestSellerRank {
        category: category.to_string(),
        rank,
    })
}

/// Parses counts the storefront renders for humans: `1K`, `1.5k`, `1,5k`,
/// `1M`, plus plain numbers with `,` or `.` thousands separators.
pub fn parse_count(text: &str) -> Result<i64> {
    let s = text.trim().to_lowercase();

    let (s, multiplier, has_unit) = if let Some(stripped) = s.strip_suffix('k') {
        (stripped.to_string(), 1_000.0, true)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped.to_string(), 1_000_000.0, true)
    } else {
        (s, 1.0, false)
    };

    let s = if has_unit {
        // "," as decimal separator
        s.replace(',', ".")
    } else {
        // "," and "." as thousands separators
        s.replace([',', '.'], "")
    };

    let value: f64 = s.parse().map_err(|_| anyhow!("invalid number format"))?;
    Ok((value * multiplier) as i64)
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text of the first match under `el`, if any and non-empty.
fn element_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// Text of the first match in the document, if any and non-empty.
fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// Concatenated text skipping `<script>` and `<style>` subtrees.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_visible_text(el, &mut out);
    out.trim().to_string()
}

fn collect_visible_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if name != "script" && name != "style" {
                collect_visible_text(child_el, out);
            }
        }
    }
}

fn strip_label(text: &str, label: &str) -> String {
    text.strip_prefix(label).unwrap_or(text).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_table() {
        let cases = [
            ("0", Some(0)),
            ("1K", Some(1_000)),
            ("1k", Some(1_000)),
            ("1.5k", Some(1_500)),
            ("1,5k", Some(1_500)),
            ("1.52k", Some(1_520)),
            ("1,52k", Some(1_520)),
            ("1521", Some(1_521)),
            ("1M", Some(1_000_000)),
            ("1m", Some(1_000_000)),
            ("1.5m", Some(1_500_000)),
            ("1,5M", Some(1_500_000)),
            ("1.502M", Some(1_502_000)),
            ("663,088", Some(663_088)),
            ("663.088", Some(663_088)),
            ("M123", None),
            ("abc", None),
            ("ab,123", None),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_count(input).ok(), expected, "input {input:?}");
        }
    }

    fn extractor() -> AmazonExtractor {
        AmazonExtractor::new().unwrap()
    }

    fn page(url: &str, html: &str) -> RenderedPage {
        RenderedPage {
            url: url.to_string(),
            html: html.to_string(),
        }
    }

    #[test]
    fn asin_comes_from_the_url_first() {
        let product = extractor()
            .extract(&page(
                "https://amazon.com/dp/B0D6PQDNQS",
                "<html><body></body></html>",
            ))
            .unwrap();
        assert_eq!(product.asin, "B0D6PQDNQS");
    }

    #[test]
    fn asin_falls_back_to_the_hidden_input() {
        let html = r#"<html><body><input id="ASIN" value="B07984JN3L"></body></html>"#;
        let product = extractor()
            .extract(&page("https://amazon.com/gp/product", html))
            .unwrap();
        assert_eq!(product.asin, "B07984JN3L");
    }

    #[test]
    fn extraction_fails_without_an_asin() {
        let err = extractor()
            .extract(&page("https://amazon.com/gp/product", "<html></html>"))
            .unwrap_err();
        assert!(err.to_string().contains("asin not found"));
    }

    #[test]
    fn extracts_title_rating_and_social_proof() {
        let html = r#"<html><body>
            <span id="productTitle"> Scotch Thermal Laminator </span>
            <div id="averageCustomerReviews" data-asin="B0D6PQDNQS">
                <span><a><span>4.8</span></a></span>
            </div>
            <span id="acrCustomerReviewText">3,421 ratings</span>
            <span id="social-proofing-faceout-title-tk_bought">1K+ bought in past month</span>
            <div id="acBadge_feature_div"><span>Amazon's Choice</span></div>
        </body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.title, "Scotch Thermal Laminator");
        assert_eq!(product.average_rating, 4.8);
        assert_eq!(product.ratings, 3_421);
        assert_eq!(product.bought_past_month, 1_000);
        assert!(product.is_amazon_choice);
    }

    #[test]
    fn stats_come_from_the_overview_table() {
        let html = r#"<html><body><div id="productOverview_feature_div"><table>
            <tr><td>Brand</td><td>Scotch</td></tr>
            <tr><td>Color</td><td>White</td></tr>
        </table></div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.brand, "Scotch");
        assert_eq!(product.color, "White");
    }

    #[test]
    fn information_table_heads_must_match_exactly() {
        // "Manufacturer" must not match the recommended-age row.
        let html = r#"<html><body><div id="prodDetails"><table>
            <tr><th>Manufacturer recommended age</th><td>3 years and up</td></tr>
            <tr><th>Manufacturer</th><td>LEGO</td></tr>
            <tr><th>Date First Available</th><td>January 2, 2006</td></tr>
        </table></div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.manufacturer, "LEGO");
        assert_eq!(product.age_range, "3 years and up");
        assert_eq!(
            product.first_available_at,
            NaiveDate::from_ymd_opt(2006, 1, 2)
        );
    }

    #[test]
    fn stats_come_from_the_detail_bullets() {
        let html = r#"<html><body><div id="detailBulletsWrapper_feature_div"><ul>
            <li><span><span>Country of Origin :</span> <span>Denmark</span></span></li>
        </ul></div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.origin, "Denmark");
    }

    #[test]
    fn best_sellers_from_the_information_table() {
        let html = r#"<html><body><div id="prodDetails"><table>
            <tr>
                <th>Best Sellers Rank</th>
                <td>#199 in Office Products (See Top 100 in Office Products) #3 in Office Laminating Supplies</td>
            </tr>
        </table></div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(
            product.best_sellers,
            vec![
                BestSellerRank {
                    category: "Office Products".to_string(),
                    rank: 199,
                },
                BestSellerRank {
                    category: "Office Laminating Supplies".to_string(),
                    rank: 3,
                },
            ]
        );
    }

    #[test]
    fn best_sellers_from_the_detail_bullets() {
        let html = r#"<html><body><div id="detailBulletsWrapper_feature_div"><ul>
            <li>Best Sellers Rank: #12,345 in Toys &amp; Games</li>
        </ul></div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.best_sellers.len(), 1);
        assert_eq!(product.best_sellers[0].rank, 12_345);
        assert_eq!(product.best_sellers[0].category, "Toys & Games");
    }

    #[test]
    fn prices_and_currency() {
        let html = r#"<html><body><div id="corePriceDisplay_desktop_feature_div">
            <span class="a-price-symbol">$</span>
            <span class="priceToPay">
                <span class="a-price-whole">27.</span><span class="a-price-fraction">99</span>
            </span>
            <div><span class="a-text-price"><span class="a-offscreen">$36.99</span></span></div>
        </div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(product.currency, "$");
        assert_eq!(product.discounted_price, 27.99);
        assert_eq!(product.list_price, 36.99);
    }

    #[test]
    fn bought_together_asins_are_deduplicated() {
        let html = r#"<html><body><div id="similarities_feature_div">
            <a href="/dp/B07984JN3L">one</a>
            <a href="/dp/B07984JN3L?th=1">one again</a>
            <a href="/dp/B0DK7B7G9R">two</a>
            <a href="/gp/help">not a product</a>
        </div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(
            product.bought_together_asins,
            vec!["B07984JN3L".to_string(), "B0DK7B7G9R".to_string()]
        );
    }

    #[test]
    fn categories_images_and_seller() {
        let html = r#"<html><body>
            <div id="wayfinding-breadcrumbs_feature_div"><ul>
                <li><a> Toys &amp; Games </a></li>
                <li><a>Building Toys</a></li>
            </ul></div>
            <div id="imageBlock"><div id="main-image-container"><ul>
                <li><img src="https://m.media-amazon.com/images/I/a.jpg"></li>
                <li><img src="https://m.media-amazon.com/images/I/b.jpg"></li>
            </ul></div></div>
            <a id="sellerProfileTriggerId" href="/sp?seller=A34ATOKEXB1ZYM">Seller</a>
        </body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(
            product.categories,
            vec!["Toys & Games".to_string(), "Building Toys".to_string()]
        );
        assert_eq!(product.images.len(), 2);
        assert_eq!(product.seller_id, "A34ATOKEXB1ZYM");
    }

    #[test]
    fn description_skips_script_content() {
        let html = r#"<html><body><div id="productDescription">
            <script>var tracking = true;</script>
            <p>Product Description</p><p>Laminates up to 9 inches wide.</p>
        </div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert!(!product.description.contains("tracking"));
        assert!(product.description.contains("Laminates"));
        assert!(!product.description.starts_with("Product Description"));
    }

    #[test]
    fn sustainability_features_from_climate_section() {
        let html = r#"<html><body><div id="climatePledgeFriendly">
            <div class="a-spacing-base">
                <span class="a-text-bold">Forestry practices</span>
                <span>certified by someone</span>
                <span class="a-text-bold">Recycled materials</span>
            </div>
        </div></body></html>"#;

        let product = extractor()
            .extract(&page("https://amazon.com/dp/B0D6PQDNQS", html))
            .unwrap();
        assert_eq!(
            product.sustainability_features,
            vec!["Forestry practices".to_string(), "Recycled materials".to_string()]
        );
    }
}
