//! Built-in templates.

/// Renders the map bound to `$map` as a flat JSON object of escaped strings.
macro_rules! loop_macro {
    () => {
        "#define( $loop ){#foreach( $key in $map.keySet() )\"$util.escapeJavaScript($key)\": \"$util.escapeJavaScript($map.get($key))\"#if( $foreach.hasNext ), #end#end}#end\n"
    };
}

/// Request template used when an endpoint has none for the request content type.
pub const DEFAULT_REQUEST_TEMPLATE: &str = concat!(
    loop_macro!(),
    r#"{
  "body": $input.json('$'),
  "method": "$context.httpMethod",
  "principalId": "$context.authorizer.principalId",
  "stage": "$context.stage",
  #set( $map = $input.params().header )
  "headers": $loop,
  #set( $map = $input.params().querystring )
  "query": $loop,
  #set( $map = $input.params().path )
  "path": $loop,
  #set( $map = $context.identity )
  "identity": $loop,
  #set( $map = $stageVariables )
  "stageVariables": $loop
}"#
);

/// Event for TOKEN authorizers. Expects `$authorizationToken` and `$methodArn`.
pub const TOKEN_AUTHORIZER_TEMPLATE: &str = r#"{
  "type": "TOKEN",
  "authorizationToken": "$util.escapeJavaScript($authorizationToken)",
  "methodArn": "$util.escapeJavaScript($methodArn)"
}"#;

/// Event for REQUEST authorizers. Expects `$methodArn` and `$requestPath`.
pub const REQUEST_AUTHORIZER_TEMPLATE: &str = concat!(
    loop_macro!(),
    r#"{
  "type": "REQUEST",
  "methodArn": "$util.escapeJavaScript($methodArn)",
  "resource": "$util.escapeJavaScript($context.resourcePath)",
  "path": "$util.escapeJavaScript($requestPath)",
  "httpMethod": "$context.httpMethod",
  #set( $map = $input.params().header )
  "headers": $loop,
  #set( $map = $input.params().querystring )
  "queryStringParameters": $loop,
  #set( $map = $input.params().path )
  "pathParameters": $loop,
  #set( $map = $stageVariables )
  "stageVariables": $loop
}"#
);
