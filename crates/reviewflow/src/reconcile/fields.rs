//! Where each platform keeps each canonical field.
//!
//! Candidate lists are tried in order; the first present, non-empty value wins.
//! Every list ends with the field names any platform may use, so an item in
//! another platform's shape still normalizes.

use crate::platform::Platform;

#[derive(Debug, Clone, Copy)]
pub enum RatingRule {
    /// Number or numeric string, rounded.
    Numeric(&'static [&'static str]),
    /// Good/bad evaluation code: `positive` maps to 5, anything else to 3.
    /// Without the code, the `fallback` fields are read as [`RatingRule::Numeric`].
    EvalCode {
        field: &'static str,
        positive: &'static str,
        fallback: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldTable {
    pub external_id: &'static [&'static str],
    pub rating: RatingRule,
    pub content: &'static [&'static str],
    pub author_name: &'static [&'static str],
    pub written_at: &'static [&'static str],
    /// Either an array of labels/label objects or one `", "`-joined summary.
    pub menus: &'static [&'static str],
    pub images: &'static [&'static str],
    /// Origin that relative image paths are joined onto.
    pub asset_base: &'static str,
    pub reply: &'static [&'static str],
}

const BAEMIN: FieldTable = FieldTable {
    external_id: &["id", "reviewId", "orderReviewId", "rview_atcl_no"],
    rating: RatingRule::Numeric(&["rating"]),
    content: &["contents", "comment", "rview_cont"],
    author_name: &["memberNickname", "nickname", "customerName", "psnl_msk_nm"],
    written_at: &["createdAt", "createdDate", "created_at", "reg_dttm"],
    menus: &["menus", "orderMenus"],
    images: &["images"],
    asset_base: "https://self.baemin.com",
    reply: &["comments", "ceoComment"],
};

const COUPANG_EATS: FieldTable = FieldTable {
    external_id: &["orderReviewId", "reviewId", "id", "rview_atcl_no"],
    rating: RatingRule::Numeric(&["rating"]),
    content: &["comment", "contents", "rview_cont"],
    author_name: &["customerName", "nickname", "memberNickname", "psnl_msk_nm"],
    written_at: &["createdAt", "created_at", "reg_dttm"],
    menus: &["orderItems", "menus"],
    images: &["images", "imageUrls"],
    asset_base: "https://store.coupangeats.com",
    reply: &["replies", "reply"],
};

const YOGIYO: FieldTable = FieldTable {
    external_id: &["id", "orderReviewId", "rview_atcl_no"],
    rating: RatingRule::Numeric(&["rating", "total_rating"]),
    content: &["comment", "contents", "rview_cont"],
    author_name: &["nickname", "memberNickname", "customerName", "psnl_msk_nm"],
    written_at: &["created_at", "createdAt", "reg_dttm"],
    menus: &["menu_summary"],
    images: &["review_images", "images"],
    asset_base: "https://ceo.yogiyo.co.kr",
    reply: &["owner_reply", "reply"],
};

const DDANGYO: FieldTable = FieldTable {
    external_id: &["rview_atcl_no", "id", "orderReviewId"],
    rating: RatingRule::EvalCode {
        field: "good_eval_cd",
        positive: "1",
        fallback: &["rating"],
    },
    content: &["rview_cont", "contents", "comment"],
    author_name: &["psnl_msk_nm", "memberNickname", "customerName", "nickname"],
    written_at: &["reg_dttm", "createdAt", "created_at"],
    menus: &["menu_nm", "ord_menu_nm"],
    images: &["file_list", "img_list"],
    asset_base: "https://boss.ddangyo.com",
    reply: &["ceo_rply_cont", "rply_cont"],
};

const NAVER: FieldTable = FieldTable {
    external_id: &["id", "reviewId", "orderReviewId", "rview_atcl_no"],
    rating: RatingRule::Numeric(&["rating", "score"]),
    content: &["body", "content", "contents", "comment", "rview_cont"],
    author_name: &["nickname", "authorName", "memberNickname", "customerName", "psnl_msk_nm"],
    written_at: &["created", "createdAt", "created_at", "reg_dttm"],
    menus: &["menus", "tags"],
    images: &["media", "images"],
    asset_base: "https://new.smartplace.naver.com",
    reply: &["reply"],
};

pub fn field_table(platform: Platform) -> &'static FieldTable {
    match platform {
        Platform::Baemin => &BAEMIN,
        Platform::CoupangEats => &COUPANG_EATS,
        Platform::Yogiyo => &YOGIYO,
        Platform::Ddangyo => &DDANGYO,
        Platform::Naver => &NAVER,
    }
}
