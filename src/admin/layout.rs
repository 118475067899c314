//! How users are laid out on the admin screens.

use serde::Serialize;

/// Named group of fields on an add or change screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fieldset {
    pub name: Option<&'static str>,
    pub fields: &'static [&'static str],
}

/// Screen configuration handed to the admin UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdminLayout {
    pub list_display: &'static [&'static str],
    pub fieldsets: &'static [Fieldset],
    pub add_fieldsets: &'static [Fieldset],
    pub search_fields: &'static [&'static str],
    pub ordering: &'static [&'static str],
    pub filter_horizontal: &'static [&'static str],
}

/// Columns of the user list.
pub const LIST_DISPLAY: &[&str] = &[
    "email",
    "last_name",
    "first_name",
    "sex",
    "phone",
    "want_notify_email",
    "want_notify_news",
    "is_staff",
    "is_active",
    "date_joined",
];

const PERMISSIONS: Fieldset = Fieldset {
    name: Some("Permissions"),
    fields: &[
        "is_active",
        "is_staff",
        "is_superuser",
        "groups",
        "user_permissions",
    ],
};

/// Change screen.
pub const FIELDSETS: &[Fieldset] = &[
    Fieldset {
        name: None,
        fields: &["email", "password", "username"],
    },
    Fieldset {
        name: Some("Personal info"),
        fields: &[
            "last_name",
            "first_name",
            "middle_name",
            "birth_year",
            "birth_month",
            "birth_day",
            "sex",
            "phone",
            "address",
            "title",
        ],
    },
    Fieldset {
        name: Some("GPS"),
        fields: &["lat", "lng"],
    },
    Fieldset {
        name: Some("Notifications"),
        fields: &["want_notify_email", "want_notify_news"],
    },
    PERMISSIONS,
    Fieldset {
        name: Some("Important dates"),
        fields: &["last_login", "date_joined"],
    },
];

/// Add screen.
pub const ADD_FIELDSETS: &[Fieldset] = &[
    Fieldset {
        name: None,
        fields: &["email", "password1", "password2"],
    },
    PERMISSIONS,
];

pub const SEARCH_FIELDS: &[&str] =
    &["username", "first_name", "last_name", "email"];
pub const ORDERING: &[&str] = &["username"];
pub const FILTER_HORIZONTAL: &[&str] = &["groups", "user_permissions"];

/// Everything above, bundled for the user admin.
pub const USER_LAYOUT: AdminLayout = AdminLayout {
    list_display: LIST_DISPLAY,
    fieldsets: FIELDSETS,
    add_fieldsets: ADD_FIELDSETS,
    search_fields: SEARCH_FIELDS,
    ordering: ORDERING,
    filter_horizontal: FILTER_HORIZONTAL,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::tests::user;

    #[test]
    fn test_fields_exist_on_user() {
        let value = serde_json::to_value(user("john@example.com")).unwrap();
        let known = |field: &str| value.get(field).is_some() || field == "password";

        for field in LIST_DISPLAY.iter().chain(SEARCH_FIELDS).chain(ORDERING) {
            assert!(known(*field), "unknown field {field}");
        }
        for fieldset in FIELDSETS {
            for field in fieldset.fields {
                assert!(known(*field), "unknown field {field}");
            }
        }
    }

    #[test]
    fn test_layout_serializes() {
        let value = serde_json::to_value(USER_LAYOUT).unwrap();

        assert_eq!(value["list_display"][0], "email");
        assert_eq!(value["fieldsets"][0]["name"], serde_json::Value::Null);
        assert_eq!(value["fieldsets"][2]["name"], "GPS");
        assert_eq!(value["add_fieldsets"][0]["fields"][2], "password2");
    }
}
