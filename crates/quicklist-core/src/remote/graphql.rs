//! reqwest-backed adapter for the host's GraphQL API.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::constants::graphql::*;
use crate::constants::LIST_PAGE_SIZE;
use crate::credentials::CredentialAccessor;
use crate::error::RemoteError;
use crate::models::{Container, ContainerId, MutationKind, SubjectId};
use crate::remote::parse;
use crate::remote::RemoteService;

/// Longest error body kept in `RemoteError::Http`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// The regular web client
    Web,
    /// The multi-column pro client
    Pro,
}

impl Host {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Host::Web => WEB_ENDPOINT,
            Host::Pro => PRO_ENDPOINT,
        }
    }

    pub fn from_hostname(hostname: &str) -> Self {
        match hostname {
            "pro.x.com" | "tweetdeck.twitter.com" => Host::Pro,
            _ => Host::Web,
        }
    }
}

/// Persisted-query ids; they rotate whenever the host redeploys its client.
#[derive(Debug, Clone)]
pub struct QueryIds {
    pub user_by_screen_name: String,
    pub lists: String,
    pub list_ownerships: String,
    pub add_member: String,
    pub remove_member: String,
    /// No default is known; deleting lists is unsupported until configured.
    pub delete_list: Option<String>,
}

impl Default for QueryIds {
    fn default() -> Self {
        Self {
            user_by_screen_name: USER_BY_SCREEN_NAME_QUERY_ID.to_string(),
            lists: LISTS_QUERY_ID.to_string(),
            list_ownerships: LIST_OWNERSHIPS_QUERY_ID.to_string(),
            add_member: ADD_MEMBER_QUERY_ID.to_string(),
            remove_member: REMOVE_MEMBER_QUERY_ID.to_string(),
            delete_list: None,
        }
    }
}

pub struct GraphqlRemote {
    client: Client,
    endpoint: String,
    query_ids: QueryIds,
    cookies: Option<Arc<dyn CredentialAccessor>>,
}

impl GraphqlRemote {
    pub fn new(host: Host) -> Self {
        Self {
            client: Client::new(),
            endpoint: host.endpoint().to_string(),
            query_ids: QueryIds::default(),
            cookies: None,
        }
    }

    /// Attach session cookies from `credentials` to every request.
    pub fn with_cookies(mut self, credentials: Arc<dyn CredentialAccessor>) -> Self {
        self.cookies = Some(credentials);
        self
    }

    pub fn with_query_ids(mut self, query_ids: QueryIds) -> Self {
        self.query_ids = query_ids;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self, query_id: &str, operation: &str) -> String {
        format!("{}/{}/{}", self.endpoint, query_id, operation)
    }

    fn authorize(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        let request = request
            .header("authorization", BEARER_TOKEN)
            .header("x-csrf-token", token)
            .header("x-twitter-client-language", "en");
        match self.cookies.as_ref().and_then(|c| c.cookie_header()) {
            Some(cookie) => request.header("cookie", cookie),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            // Mutations report "already/not a member" in a JSON body even on
            // non-2xx responses; keep that body when it parses.
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if parse::first_error(&value).is_some() {
                    return Ok(value);
                }
            }
            tracing::warn!(status = status.as_u16(), "remote returned an error status");
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn get(&self, token: &str, url: String, params: &[(&str, Value)]) -> Result<Value, RemoteError> {
        let query: Vec<(&str, String)> = params
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect();
        let request = self.authorize(self.client.get(url).query(&query), token);
        self.send(request).await
    }

    async fn post(&self, token: &str, url: String, body: Value) -> Result<Value, RemoteError> {
        let request = self.authorize(
            self.client
                .post(url)
                .header("content-type", "application/json")
                .json(&body),
            token,
        );
        self.send(request).await
    }

    async fn mutate(
        &self,
        token: &str,
        kind: MutationKind,
        container_id: &str,
        subject_id: &str,
    ) -> Result<(), RemoteError> {
        let (query_id, operation) = match kind {
            MutationKind::Add => (&self.query_ids.add_member, "ListAddMember"),
            MutationKind::Remove => (&self.query_ids.remove_member, "ListRemoveMember"),
        };
        let body = json!({
            "variables": { "listId": container_id, "userId": subject_id },
            "features": mutation_features(),
            "queryId": query_id,
        });
        let response = self.post(token, self.url(query_id, operation), body).await?;
        parse::parse_mutation(&response, kind)
    }
}

impl RemoteService for GraphqlRemote {
    fn resolve_handle<'a>(
        &'a self,
        token: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<SubjectId, RemoteError>> {
        async move {
            let url = self.url(&self.query_ids.user_by_screen_name, "UserByScreenName");
            let params = [
                (
                    "variables",
                    json!({ "screen_name": handle, "withGrokTranslatedBio": false }),
                ),
                ("features", profile_features()),
                (
                    "fieldToggles",
                    json!({ "withPayments": false, "withAuxiliaryUserLabels": true }),
                ),
            ];
            let body = self.get(token, url, &params).await?;
            parse::parse_user_id(&body)
        }
        .boxed()
    }

    fn list_containers<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Container>, RemoteError>> {
        async move {
            let url = self.url(&self.query_ids.lists, "ListsManagementPageTimeline");
            let params = [
                ("variables", json!({ "count": LIST_PAGE_SIZE })),
                ("features", timeline_features()),
            ];
            let body = self.get(token, url, &params).await?;
            parse::parse_lists(&body)
        }
        .boxed()
    }

    fn membership_snapshot<'a>(
        &'a self,
        token: &'a str,
        viewer_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<ContainerId, bool>, RemoteError>> {
        async move {
            let url = self.url(&self.query_ids.list_ownerships, "ListOwnerships");
            let params = [
                (
                    "variables",
                    json!({
                        "userId": viewer_id,
                        "isListMemberTargetUserId": subject_id,
                        "count": LIST_PAGE_SIZE,
                    }),
                ),
                ("features", timeline_features()),
            ];
            let body = self.get(token, url, &params).await?;
            parse::parse_membership(&body)
        }
        .boxed()
    }

    fn add_member<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        self.mutate(token, MutationKind::Add, container_id, subject_id)
            .boxed()
    }

    fn remove_member<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        self.mutate(token, MutationKind::Remove, container_id, subject_id)
            .boxed()
    }

    fn delete_container<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            let query_id = self
                .query_ids
                .delete_list
                .as_deref()
                .ok_or(RemoteError::Unsupported("delete list"))?;
            let body = json!({
                "variables": { "listId": container_id },
                "queryId": query_id,
            });
            let response = self
                .post(token, self.url(query_id, "DeleteList"), body)
                .await?;
            match parse::first_error(&response) {
                Some(message) => Err(RemoteError::Api(message)),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

fn profile_features() -> Value {
    json!({
        "hidden_profile_subscriptions_enabled": true,
        "profile_label_improvements_pcf_label_in_post_enabled": true,
        "responsive_web_profile_redirect_enabled": false,
        "rweb_tipjar_consumption_enabled": true,
        "verified_phone_label_enabled": true,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "responsive_web_twitter_article_notes_tab_enabled": true,
        "subscriptions_feature_can_gift_premium": true,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true
    })
}

fn mutation_features() -> Value {
    json!({
        "profile_label_improvements_pcf_label_in_post_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_profile_redirect_enabled": false,
        "rweb_tipjar_consumption_enabled": true,
        "verified_phone_label_enabled": true
    })
}

/// Feature switches shared by the list timelines.
fn timeline_features() -> Value {
    let enabled = [
        "profile_label_improvements_pcf_label_in_post_enabled",
        "rweb_tipjar_consumption_enabled",
        "verified_phone_label_enabled",
        "creator_subscriptions_tweet_preview_api_enabled",
        "responsive_web_graphql_timeline_navigation_enabled",
        "communities_web_enable_tweet_community_results_fetch",
        "c9s_tweet_anatomy_moderator_badge_enabled",
        "responsive_web_grok_analyze_post_followups_enabled",
        "responsive_web_jetfuel_frame",
        "responsive_web_grok_share_attachment_enabled",
        "articles_preview_enabled",
        "responsive_web_edit_tweet_api_enabled",
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled",
        "view_counts_everywhere_api_enabled",
        "longform_notetweets_consumption_enabled",
        "responsive_web_twitter_article_tweet_consumption_enabled",
        "responsive_web_grok_analysis_button_from_backend",
        "freedom_of_speech_not_reach_fetch_enabled",
        "standardized_nudges_misinfo",
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled",
        "longform_notetweets_rich_text_read_enabled",
        "longform_notetweets_inline_media_enabled",
        "responsive_web_grok_image_annotation_enabled",
        "responsive_web_grok_imagine_annotation_enabled",
    ];
    let disabled = [
        "rweb_video_screen_enabled",
        "responsive_web_profile_redirect_enabled",
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled",
        "premium_content_api_read_enabled",
        "responsive_web_grok_analyze_button_fetch_trends_enabled",
        "tweet_awards_web_tipping_enabled",
        "responsive_web_grok_show_grok_translated_post",
        "creator_subscriptions_quote_tweet_preview_enabled",
        "responsive_web_grok_community_note_auto_translation_is_enabled",
        "responsive_web_enhance_cards_enabled",
    ];

    let mut features = serde_json::Map::new();
    for name in enabled {
        features.insert(name.to_string(), Value::Bool(true));
    }
    for name in disabled {
        features.insert(name.to_string(), Value::Bool(false));
    }
    Value::Object(features)
}
